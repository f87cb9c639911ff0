//! Discovery: paging through the catalog for actionable items.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::WorkCatalog;
use crate::cancel::ConnectionRegistry;
use crate::item::{ItemStatus, TransientStatus, WorkItem};
use crate::probe::StatusProbe;

use super::config::SchedulerConfig;
use super::types::Candidate;

/// Whether an item's stored state contradicts itself and is worth a
/// breakage check: ready with no pages or stages, or ready with a stale
/// completion marker in its last message.
pub fn looks_inconsistent(item: &WorkItem, stale_phrases: &[String]) -> bool {
    if item.status != ItemStatus::Ready {
        return false;
    }
    if item.page_count == Some(0) || item.stages.is_empty() {
        return true;
    }
    item.last_message.as_deref().is_some_and(|message| {
        let message = message.to_lowercase();
        stale_phrases
            .iter()
            .any(|phrase| !phrase.is_empty() && message.contains(&phrase.to_lowercase()))
    })
}

/// What one discovery pass found.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub candidates: Vec<Candidate>,
    /// Items found with nothing to do.
    pub skipped: u64,
    pub pages_scanned: u32,
}

/// One discovery pass over the catalog.
pub(crate) struct Discovery {
    pub(crate) catalog: Arc<dyn WorkCatalog>,
    pub(crate) probe: StatusProbe,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) config: SchedulerConfig,
    pub(crate) limit_to_core_analysis: bool,
}

impl Discovery {
    /// Collect up to `batch_size` candidates, marking everything it decides
    /// on as handled.
    pub(crate) async fn collect(&self, handled: &mut HashSet<String>, scope: &CancellationToken) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        let mut page = 1u32;

        'pages: loop {
            if scope.is_cancelled() {
                break;
            }

            let listing = match self.catalog.page(page, self.config.page_size).await {
                Ok(listing) => listing,
                Err(e) => {
                    warn!("Catalog page {} failed, ending discovery: {}", page, e);
                    break;
                }
            };
            report.pages_scanned += 1;
            let exhausted = listing.items.is_empty() || page >= listing.total_pages;

            for item in listing.items {
                if report.candidates.len() >= self.config.batch_size {
                    break 'pages;
                }
                if scope.is_cancelled() {
                    break 'pages;
                }
                if let Some(candidate) = self.classify(item, handled, &mut report).await {
                    report.candidates.push(candidate);
                }
            }

            if exhausted || report.candidates.len() >= self.config.batch_size {
                break;
            }
            page += 1;
        }

        info!(
            "Discovery scanned {} pages: {} candidates, {} already complete",
            report.pages_scanned,
            report.candidates.len(),
            report.skipped
        );
        report
    }

    async fn classify(
        &self,
        item: WorkItem,
        handled: &mut HashSet<String>,
        report: &mut DiscoveryReport,
    ) -> Option<Candidate> {
        if handled.contains(&item.id) {
            return None;
        }
        if item.transient_status == Some(TransientStatus::Processing) || self.registry.contains(&item.id) {
            debug!(item_id = %item.id, "Already processing, skipping");
            return None;
        }

        if looks_inconsistent(&item, &self.config.stale_completion_phrases) {
            handled.insert(item.id.clone());
            if self.probe.is_broken(&item.id).await {
                debug!(item_id = %item.id, "Confirmed broken, queueing repair");
                return Some(Candidate::Repair(item));
            }
            report.skipped += 1;
            return None;
        }

        let status = self.probe.probe(&item.id, item.kind).await;
        handled.insert(item.id.clone());
        if status.needed_stages(self.limit_to_core_analysis).is_empty() {
            report.skipped += 1;
            None
        } else {
            Some(Candidate::Process(item))
        }
    }
}
