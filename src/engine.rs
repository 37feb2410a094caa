//
// engine.rs
// Dicom-Hanging-rs
//
// Aggregates rule outcomes into a candidate score and picks the protocol to hang.
//
// Thales Matheus Mendonça Santos - November 2025

use std::sync::Arc;

use tracing::{debug, warn};

use crate::attributes::{AttributeResolver, MatchContext, Subject};
use crate::error::{HangingProtocolError, Result};
use crate::models::{DisplaySet, MatchDetail, Study};
use crate::protocol::{Protocol, Rule};
use crate::rules;

/// Score of one subject against a list of rules.
///
/// When `required_failed` is set the score is still reported, but the candidate must be dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub score: f64,
    pub required_failed: bool,
    pub details: MatchDetail,
}

#[derive(Debug, Clone, Copy)]
pub struct MatchEngine<'r> {
    resolver: &'r AttributeResolver,
}

impl<'r> MatchEngine<'r> {
    pub fn new(resolver: &'r AttributeResolver) -> Self {
        Self { resolver }
    }

    pub fn find_match(
        &self,
        subject: &Subject<'_>,
        rules: &[Rule],
        context: &MatchContext<'_>,
    ) -> MatchOutcome {
        let mut outcome = MatchOutcome::default();
        for rule in rules {
            let result = rules::evaluate(rule, self.resolver, subject, context);
            outcome.score += result.score;
            if result.passed {
                outcome.details.passed.push(result.detail);
            } else {
                outcome.required_failed |= rule.required;
                outcome.details.failed.push(result.detail);
            }
        }
        outcome
    }

    /// Score every registered protocol against the active study and return the winner.
    ///
    /// Ties keep the earliest registration. If every protocol is disqualified by a required rule,
    /// the protocol with id `default` is used when present, otherwise the first one registered.
    pub fn select_protocol(
        &self,
        protocols: &[Arc<Protocol>],
        studies: &[Study],
        active_study: Option<&Study>,
        display_sets: &[DisplaySet],
    ) -> Result<Arc<Protocol>> {
        let first = protocols
            .first()
            .ok_or(HangingProtocolError::NoProtocolAvailable)?;

        let empty = Study::default();
        let study = active_study.or(studies.first()).unwrap_or(&empty);
        let context = MatchContext {
            studies,
            display_sets,
            instance: None,
        };

        let mut best: Option<(f64, &Arc<Protocol>)> = None;
        for protocol in protocols {
            let outcome = self.find_match(
                &Subject::Study(study),
                &protocol.protocol_matching_rules,
                &context,
            );
            debug!(
                protocol = %protocol.id,
                score = outcome.score,
                required_failed = outcome.required_failed,
                "scored protocol"
            );
            if outcome.required_failed {
                continue;
            }
            if best.map_or(true, |(score, _)| outcome.score > score) {
                best = Some((outcome.score, protocol));
            }
        }

        if let Some((_, protocol)) = best {
            return Ok(Arc::clone(protocol));
        }

        let fallback = protocols
            .iter()
            .find(|p| p.id == "default")
            .unwrap_or(first);
        warn!(
            protocol = %fallback.id,
            "No hanging protocol matched the active study, falling back"
        );
        Ok(Arc::clone(fallback))
    }
}
