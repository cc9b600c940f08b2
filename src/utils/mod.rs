pub mod constants;
pub mod fees;
mod sha256;
#[cfg(test)]
pub mod test_utils;

pub use sha256::sha256sum;
