//! Dutch auctions: a listing re-signed at a lower price on a fixed schedule.
//!
//! Every tier carries its own signed listing. The schedule only says which one is
//! currently offered; whether the auction is over is decided by the chain.

use serde::{Deserialize, Serialize};

use crate::inscription::InscriptionId;
use crate::orderbook::OrderEvent;
use crate::{OrdError, OrdResult};

/// A price step of an auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionTier {
    /// Price in sats.
    pub price: u64,
    /// Unix time in seconds the tier becomes current.
    pub scheduled_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_psbt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nostr_event_id: Option<String>,
}

impl AuctionTier {
    pub fn new(price: u64, scheduled_time: u64) -> Self {
        Self {
            price,
            scheduled_time,
            signed_psbt: None,
            nostr_event_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuctionStatus {
    Running,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DutchAuction {
    pub inscription_id: InscriptionId,
    pub metadata: Vec<AuctionTier>,
    pub current_price: u64,
    /// Seconds between two tiers.
    pub time_between_each_decrease: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decrease_amount: Option<u64>,
    pub status: AuctionStatus,
}

/// Where an auction stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionState {
    /// Unix time in milliseconds the current tier ends.
    pub end_date: u64,
    pub current: AuctionTier,
    /// `None` on the final tier.
    pub next: Option<AuctionTier>,
}

/// Checks prices strictly decrease and times strictly increase along `tiers`.
pub fn validate_schedule(tiers: &[AuctionTier]) -> OrdResult<()> {
    if tiers.is_empty() {
        return Err(OrdError::InvalidOrder("auction has no tiers".to_string()));
    }
    for pair in tiers.windows(2) {
        if pair[1].price >= pair[0].price {
            return Err(OrdError::InvalidOrder(format!(
                "auction price goes from {} to {}",
                pair[0].price, pair[1].price
            )));
        }
        if pair[1].scheduled_time <= pair[0].scheduled_time {
            return Err(OrdError::InvalidOrder(format!(
                "auction time goes from {} to {}",
                pair[0].scheduled_time, pair[1].scheduled_time
            )));
        }
    }

    Ok(())
}

impl DutchAuction {
    /// Price step between tiers; the gap of the first two tiers unless set.
    pub fn decrease_amount(&self) -> Option<u64> {
        self.decrease_amount.or_else(|| match self.metadata.as_slice() {
            [first, second, ..] => first.price.checked_sub(second.price),
            _ => None,
        })
    }

    fn tier_priced(&self, price: u64) -> Option<&AuctionTier> {
        self.metadata.iter().find(|tier| tier.price == price)
    }

    pub fn state(&self) -> OrdResult<AuctionState> {
        let current = self.tier_priced(self.current_price).cloned().ok_or_else(|| {
            OrdError::InvalidOrder(format!(
                "auction of {} has no tier priced {}",
                self.inscription_id, self.current_price
            ))
        })?;
        let next = self
            .decrease_amount()
            .filter(|decrease| *decrease > 0)
            .and_then(|decrease| self.current_price.checked_sub(decrease))
            .and_then(|price| self.tier_priced(price))
            .cloned();
        let end_date = current
            .scheduled_time
            .saturating_add(self.time_between_each_decrease)
            .saturating_mul(1000);

        Ok(AuctionState {
            end_date,
            current,
            next,
        })
    }

    pub fn validate(&self) -> OrdResult<()> {
        validate_schedule(&self.metadata)
    }

    pub fn is_running(&self) -> bool {
        self.status == AuctionStatus::Running
    }

    /// Tier `event` publishes, by event id first, then by signed listing.
    pub fn match_event(&self, event: &OrderEvent) -> Option<&AuctionTier> {
        self.metadata
            .iter()
            .find(|tier| tier.nostr_event_id.as_deref() == Some(event.id.as_str()))
            .or_else(|| {
                self.metadata
                    .iter()
                    .find(|tier| tier.signed_psbt.as_deref() == Some(event.content.as_str()))
            })
    }
}

/// Event ids published by the running auctions, to subscribe to them by id.
pub fn running_event_ids(auctions: &[DutchAuction]) -> Vec<String> {
    auctions
        .iter()
        .filter(|auction| auction.is_running())
        .flat_map(|auction| auction.metadata.iter())
        .filter_map(|tier| tier.nostr_event_id.clone())
        .collect()
}

/// Tiers of an auction about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionSchedule {
    pub tiers: Vec<AuctionTier>,
}

impl AuctionSchedule {
    /// Steps down from `start_price` by `decrease_amount` every `time_between` seconds,
    /// without going below `reserve_price`.
    ///
    /// The last tier is the lowest step above or at the reserve, so that every tier is
    /// exactly one decrease below the previous one.
    pub fn generate(
        start_price: u64,
        reserve_price: u64,
        decrease_amount: u64,
        time_between: u64,
        start_time: u64,
    ) -> OrdResult<Self> {
        if decrease_amount == 0 {
            return Err(OrdError::InvalidOrder(
                "decrease amount must be > 0".to_string(),
            ));
        }
        if time_between == 0 {
            return Err(OrdError::InvalidOrder(
                "time between decreases must be > 0".to_string(),
            ));
        }
        if reserve_price > start_price {
            return Err(OrdError::InvalidOrder(format!(
                "reserve price {reserve_price} above start price {start_price}"
            )));
        }

        let mut tiers = Vec::new();
        let mut price = start_price;
        let mut time = start_time;
        loop {
            tiers.push(AuctionTier::new(price, time));
            match price.checked_sub(decrease_amount) {
                Some(next) if next >= reserve_price => {
                    price = next;
                    time = time.saturating_add(time_between);
                }
                _ => break,
            }
        }
        debug!(
            "generated {} auction tiers from {start_price} down to {price}",
            tiers.len()
        );

        Ok(Self { tiers })
    }

    /// Tiers due at `now`, that is scheduled at or before it.
    pub fn due(&self, now: u64) -> impl Iterator<Item = &AuctionTier> {
        self.tiers.iter().filter(move |tier| tier.scheduled_time <= now)
    }

    pub fn into_auction(
        self,
        inscription_id: InscriptionId,
        decrease_amount: u64,
        time_between: u64,
    ) -> OrdResult<DutchAuction> {
        validate_schedule(&self.tiers)?;
        let current_price = self.tiers[0].price;

        Ok(DutchAuction {
            inscription_id,
            metadata: self.tiers,
            current_price,
            time_between_each_decrease: time_between,
            decrease_amount: Some(decrease_amount),
            status: AuctionStatus::Running,
        })
    }
}
