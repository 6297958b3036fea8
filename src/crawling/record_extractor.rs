//! Record extractor
//!
//! Runs the contact chain over every collected card of a leaf view.

use tracing::{debug, info};

use crate::crawling::pause::PauseSignal;
use crate::domain::RawCard;
use crate::infrastructure::browser::AutomationContext;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::harvest_error::HarvestResult;
use crate::infrastructure::parsing::contact_extractors::ContactChain;

#[derive(Debug, Clone, Default)]
pub struct EnrichReport {
    pub cards: Vec<RawCard>,
    /// Cards that had no actionable contact when collected but got one here
    pub enriched: usize,
    pub without_contact: usize,
}

pub struct RecordExtractor {
    chain: ContactChain,
}

impl RecordExtractor {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            chain: ContactChain::standard(config),
        }
    }

    pub fn with_chain(chain: ContactChain) -> Self {
        Self { chain }
    }

    pub async fn enrich(
        &self,
        context: &dyn AutomationContext,
        cards: Vec<RawCard>,
        pause: &PauseSignal,
    ) -> HarvestResult<EnrichReport> {
        let mut report = EnrichReport {
            cards: Vec::with_capacity(cards.len()),
            ..EnrichReport::default()
        };

        for mut card in cards {
            pause.check()?;
            let had_contact = card.contact.is_actionable();
            card.contact = self.chain.extract(context, &card, pause).await?;
            if card.contact.is_actionable() {
                if !had_contact {
                    report.enriched += 1;
                }
            } else {
                debug!("No contact found for {}", card.full_address());
                report.without_contact += 1;
            }
            report.cards.push(card);
        }

        info!(
            "📇 Contacts: {} enriched, {} still missing of {} cards",
            report.enriched,
            report.without_contact,
            report.cards.len()
        );
        Ok(report)
    }
}
