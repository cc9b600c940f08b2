use bitcoin::key::{Keypair, Secp256k1, TapTweak as _};
use bitcoin::secp256k1::{self, ecdsa, schnorr, All, Message, SecretKey};
use bitcoin::{Address, Network, PrivateKey, PublicKey, ScriptBuf, XOnlyPublicKey};

use crate::{OrdError, OrdResult};

/// How the inputs owned by a signer are described in a PSBT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputForm {
    /// Taproot key path spend; inputs carry `tap_internal_key`.
    TaprootKeyPath,
    /// Inputs carry the full previous transaction in `non_witness_utxo`.
    NonWitness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigScheme {
    Schnorr,
    Ecdsa,
}

/// A digest to sign with the given scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignRequest {
    pub sighash: [u8; 32],
    pub scheme: SigScheme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSignature {
    Schnorr(schnorr::Signature),
    Ecdsa(ecdsa::Signature),
}

impl From<schnorr::Signature> for InputSignature {
    fn from(sig: schnorr::Signature) -> Self {
        Self::Schnorr(sig)
    }
}

impl From<ecdsa::Signature> for InputSignature {
    fn from(sig: ecdsa::Signature) -> Self {
        Self::Ecdsa(sig)
    }
}

/// Address and keys of a signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    pub address: Address,
    pub script_pubkey: ScriptBuf,
    pub public_key: PublicKey,
    /// Untweaked taproot key, for taproot wallets.
    pub internal_key: Option<XOnlyPublicKey>,
}

impl AddressInfo {
    pub fn new(address: Address, public_key: PublicKey, internal_key: Option<XOnlyPublicKey>) -> Self {
        Self {
            script_pubkey: address.script_pubkey(),
            address,
            public_key,
            internal_key,
        }
    }
}

/// Signing capability of a marketplace session.
///
/// A signer is picked once when the session starts and then injected wherever
/// something has to be signed.
#[async_trait::async_trait]
pub trait Signer: Send + Sync {
    fn input_form(&self) -> InputForm;

    fn address_info(&self) -> &AddressInfo;

    /// Signs a transaction digest.
    async fn sign(&self, request: SignRequest) -> OrdResult<InputSignature>;

    /// Key order events are published with.
    fn event_public_key(&self) -> XOnlyPublicKey;

    /// BIP-340 signature of an order event id.
    async fn sign_event(&self, id: [u8; 32]) -> OrdResult<schnorr::Signature>;

    fn sig_scheme(&self) -> SigScheme {
        match self.input_form() {
            InputForm::TaprootKeyPath => SigScheme::Schnorr,
            InputForm::NonWitness => SigScheme::Ecdsa,
        }
    }
}

enum LocalKey {
    /// `keypair` is the internal key, `tweaked` the output key it commits to.
    P2tr { keypair: Keypair, tweaked: Keypair },
    P2wpkh { private_key: PrivateKey, keypair: Keypair },
}

/// Signer holding its private key in memory.
pub struct LocalSigner {
    key: LocalKey,
    info: AddressInfo,
    secp: Secp256k1<All>,
}

impl LocalSigner {
    /// Single key taproot wallet, without script tree.
    pub fn p2tr(secret_key: SecretKey, network: Network) -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &secret_key);
        let tweaked = keypair.tap_tweak(&secp, None).to_inner();
        let (internal_key, _) = keypair.x_only_public_key();

        let address = Address::p2tr(&secp, internal_key, None, network);
        let info = AddressInfo::new(
            address,
            PublicKey::new(keypair.public_key()),
            Some(internal_key),
        );

        Self {
            key: LocalKey::P2tr { keypair, tweaked },
            info,
            secp,
        }
    }

    /// Taproot wallet with a freshly generated key.
    #[cfg(feature = "rand")]
    pub fn random(network: Network) -> Self {
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        Self::p2tr(secret_key, network)
    }

    pub fn p2wpkh(private_key: PrivateKey, network: Network) -> OrdResult<Self> {
        let secp = Secp256k1::new();
        let public_key = private_key.public_key(&secp);
        let address = Address::p2wpkh(&public_key, network)?;
        let keypair = Keypair::from_secret_key(&secp, &private_key.inner);

        Ok(Self {
            key: LocalKey::P2wpkh {
                private_key,
                keypair,
            },
            info: AddressInfo::new(address, public_key, None),
            secp,
        })
    }

    fn event_keypair(&self) -> &Keypair {
        match &self.key {
            LocalKey::P2tr { keypair, .. } => keypair,
            LocalKey::P2wpkh { keypair, .. } => keypair,
        }
    }
}

#[async_trait::async_trait]
impl Signer for LocalSigner {
    fn input_form(&self) -> InputForm {
        match self.key {
            LocalKey::P2tr { .. } => InputForm::TaprootKeyPath,
            LocalKey::P2wpkh { .. } => InputForm::NonWitness,
        }
    }

    fn address_info(&self) -> &AddressInfo {
        &self.info
    }

    async fn sign(&self, request: SignRequest) -> OrdResult<InputSignature> {
        let msg = Message::from_digest(request.sighash);

        match (&self.key, request.scheme) {
            (LocalKey::P2tr { tweaked, .. }, SigScheme::Schnorr) => {
                let sig = self.secp.sign_schnorr_no_aux_rand(&msg, tweaked);
                // verify
                self.secp
                    .verify_schnorr(&sig, &msg, &tweaked.x_only_public_key().0)?;
                Ok(sig.into())
            }
            (LocalKey::P2wpkh { private_key, .. }, SigScheme::Ecdsa) => {
                let sig = self.secp.sign_ecdsa(&msg, &private_key.inner);
                // verify
                self.secp
                    .verify_ecdsa(&msg, &sig, &self.info.public_key.inner)?;
                Ok(sig.into())
            }
            _ => Err(OrdError::UnexpectedSignature),
        }
    }

    fn event_public_key(&self) -> XOnlyPublicKey {
        self.event_keypair().x_only_public_key().0
    }

    async fn sign_event(&self, id: [u8; 32]) -> OrdResult<schnorr::Signature> {
        let msg = Message::from_digest(id);
        Ok(self.secp.sign_schnorr_no_aux_rand(&msg, self.event_keypair()))
    }
}

/// Bridge to a signer living outside of this process, such as a browser extension or
/// a remote signing service.
///
/// Digests and signatures travel hex encoded.
#[async_trait::async_trait]
pub trait SigningBackend: Send + Sync {
    /// Returns a 64 bytes BIP-340 signature made with the wallet output key.
    async fn sign_schnorr(&self, digest_hex: &str) -> OrdResult<String>;

    /// Returns a 64 bytes compact ECDSA signature.
    async fn sign_ecdsa(&self, digest_hex: &str) -> OrdResult<String>;

    /// Returns a 64 bytes BIP-340 signature made with the event key.
    async fn sign_event(&self, id_hex: &str) -> OrdResult<String>;
}

/// [`Signer`] backed by a [`SigningBackend`].
///
/// Every signature returned by the backend is verified before being accepted.
pub struct ExternalSigner {
    backend: Box<dyn SigningBackend>,
    info: AddressInfo,
    form: InputForm,
    event_key: XOnlyPublicKey,
    secp: Secp256k1<All>,
}

impl ExternalSigner {
    pub fn new(
        backend: Box<dyn SigningBackend>,
        info: AddressInfo,
        form: InputForm,
        event_key: XOnlyPublicKey,
    ) -> Self {
        Self {
            backend,
            info,
            form,
            event_key,
            secp: Secp256k1::new(),
        }
    }

    /// Key committed in the taproot output script.
    fn output_key(&self) -> OrdResult<XOnlyPublicKey> {
        let script = self.info.script_pubkey.as_bytes();
        if !self.info.script_pubkey.is_p2tr() {
            return Err(OrdError::InvalidScriptType);
        }
        Ok(XOnlyPublicKey::from_slice(&script[2..34])?)
    }
}

#[async_trait::async_trait]
impl Signer for ExternalSigner {
    fn input_form(&self) -> InputForm {
        self.form
    }

    fn address_info(&self) -> &AddressInfo {
        &self.info
    }

    async fn sign(&self, request: SignRequest) -> OrdResult<InputSignature> {
        debug!("requesting {:?} signature from external signer", request.scheme);
        let msg_hex = hex::encode(request.sighash);
        let msg = Message::from_digest(request.sighash);

        match request.scheme {
            SigScheme::Schnorr => {
                let sig_hex = self.backend.sign_schnorr(&msg_hex).await?;
                let sig = schnorr::Signature::from_slice(&hex::decode(sig_hex)?)?;
                self.secp.verify_schnorr(&sig, &msg, &self.output_key()?)?;
                Ok(sig.into())
            }
            SigScheme::Ecdsa => {
                let sig_hex = self.backend.sign_ecdsa(&msg_hex).await?;
                let sig = ecdsa::Signature::from_compact(&hex::decode(sig_hex)?)?;
                self.secp
                    .verify_ecdsa(&msg, &sig, &self.info.public_key.inner)?;
                Ok(sig.into())
            }
        }
    }

    fn event_public_key(&self) -> XOnlyPublicKey {
        self.event_key
    }

    async fn sign_event(&self, id: [u8; 32]) -> OrdResult<schnorr::Signature> {
        let sig_hex = self.backend.sign_event(&hex::encode(id)).await?;
        let sig = schnorr::Signature::from_slice(&hex::decode(sig_hex)?)?;
        self.secp
            .verify_schnorr(&sig, &Message::from_digest(id), &self.event_key)
            .map_err(|_| OrdError::SignatureInvalid)?;
        Ok(sig)
    }
}

/// Verifies a BIP-340 signature over `digest`.
pub(crate) fn verify_schnorr(
    digest: [u8; 32],
    sig: &schnorr::Signature,
    key: &XOnlyPublicKey,
) -> OrdResult<()> {
    Secp256k1::verification_only()
        .verify_schnorr(sig, &Message::from_digest(digest), key)
        .map_err(|_| OrdError::SignatureInvalid)
}

/// Verifies an ECDSA signature over `digest`.
pub(crate) fn verify_ecdsa(
    digest: [u8; 32],
    sig: &ecdsa::Signature,
    key: &secp256k1::PublicKey,
) -> OrdResult<()> {
    Secp256k1::verification_only()
        .verify_ecdsa(&Message::from_digest(digest), sig, key)
        .map_err(|_| OrdError::SignatureInvalid)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::test_utils::{p2tr_signer, p2wpkh_signer};

    struct Backend {
        tweaked: Keypair,
        event: Keypair,
    }

    #[async_trait::async_trait]
    impl SigningBackend for Backend {
        async fn sign_schnorr(&self, digest_hex: &str) -> OrdResult<String> {
            let digest: [u8; 32] = hex::decode(digest_hex)?
                .try_into()
                .map_err(|_| OrdError::UnexpectedSignature)?;
            let sig = Secp256k1::new()
                .sign_schnorr_no_aux_rand(&Message::from_digest(digest), &self.tweaked);
            Ok(sig.to_string())
        }

        async fn sign_ecdsa(&self, _digest_hex: &str) -> OrdResult<String> {
            Err(OrdError::UnexpectedSignature)
        }

        async fn sign_event(&self, id_hex: &str) -> OrdResult<String> {
            let id: [u8; 32] = hex::decode(id_hex)?
                .try_into()
                .map_err(|_| OrdError::UnexpectedSignature)?;
            let sig = Secp256k1::new().sign_schnorr_no_aux_rand(&Message::from_digest(id), &self.event);
            Ok(sig.to_string())
        }
    }

    #[tokio::test]
    async fn test_should_sign_with_p2tr_output_key() {
        let signer = p2tr_signer(1);
        assert_eq!(signer.input_form(), InputForm::TaprootKeyPath);
        assert!(signer.address_info().script_pubkey.is_p2tr());

        let sighash = [7u8; 32];
        let InputSignature::Schnorr(sig) = signer
            .sign(SignRequest {
                sighash,
                scheme: SigScheme::Schnorr,
            })
            .await
            .unwrap()
        else {
            panic!("expected schnorr signature");
        };

        let spk = signer.address_info().script_pubkey.as_bytes();
        let output_key = XOnlyPublicKey::from_slice(&spk[2..34]).unwrap();
        assert!(verify_schnorr(sighash, &sig, &output_key).is_ok());
        // the internal key does not sign for the output
        assert!(verify_schnorr(sighash, &sig, &signer.event_public_key()).is_err());
    }

    #[tokio::test]
    async fn test_should_sign_events_with_internal_key() {
        let signer = p2tr_signer(2);
        let id = [3u8; 32];
        let sig = signer.sign_event(id).await.unwrap();
        assert!(verify_schnorr(id, &sig, &signer.event_public_key()).is_ok());
        assert_eq!(
            Some(signer.event_public_key()),
            signer.address_info().internal_key
        );
    }

    #[tokio::test]
    async fn test_should_sign_ecdsa_with_p2wpkh() {
        let signer = p2wpkh_signer(3);
        assert_eq!(signer.input_form(), InputForm::NonWitness);
        assert!(signer.address_info().script_pubkey.is_p2wpkh());

        let sighash = [9u8; 32];
        let InputSignature::Ecdsa(sig) = signer
            .sign(SignRequest {
                sighash,
                scheme: SigScheme::Ecdsa,
            })
            .await
            .unwrap()
        else {
            panic!("expected ecdsa signature");
        };
        assert!(verify_ecdsa(sighash, &sig, &signer.address_info().public_key.inner).is_ok());

        assert!(matches!(
            signer
                .sign(SignRequest {
                    sighash,
                    scheme: SigScheme::Schnorr,
                })
                .await,
            Err(OrdError::UnexpectedSignature)
        ));
    }

    #[tokio::test]
    async fn test_should_verify_external_signatures() {
        let secp = Secp256k1::new();
        let local = p2tr_signer(4);
        let keypair = Keypair::from_secret_key(&secp, &SecretKey::from_slice(&[4u8; 32]).unwrap());
        let event = Keypair::from_secret_key(&secp, &SecretKey::from_slice(&[5u8; 32]).unwrap());

        let honest = ExternalSigner::new(
            Box::new(Backend {
                tweaked: keypair.tap_tweak(&secp, None).to_inner(),
                event,
            }),
            local.address_info().clone(),
            InputForm::TaprootKeyPath,
            event.x_only_public_key().0,
        );
        let request = SignRequest {
            sighash: [1u8; 32],
            scheme: SigScheme::Schnorr,
        };
        assert!(honest.sign(request).await.is_ok());
        assert!(honest.sign_event([2u8; 32]).await.is_ok());

        // backend signing with the untweaked key is rejected
        let dishonest = ExternalSigner::new(
            Box::new(Backend {
                tweaked: keypair,
                event,
            }),
            local.address_info().clone(),
            InputForm::TaprootKeyPath,
            event.x_only_public_key().0,
        );
        assert!(dishonest.sign(request).await.is_err());
    }
}
