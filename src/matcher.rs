//
// matcher.rs
// Dicom-Hanging-rs
//
// Matches each display-set rule set of a stage against every study x display set pair and ranks
// the surviving candidates.
//
// Thales Matheus Mendonça Santos - November 2025

use std::cmp::Ordering;

use tracing::debug;

use crate::attributes::{MatchContext, Subject};
use crate::engine::MatchEngine;
use crate::models::{
    CandidateMatch, DisplaySet, DisplaySetMatch, DisplaySetMatchDetails, MatchDetail, SortingInfo,
    Study,
};
use crate::protocol::{DisplaySetRuleSet, Stage};

/// Rebuild the rule-set id -> ranked matches table for a stage.
pub fn match_stage(
    engine: &MatchEngine<'_>,
    stage: &Stage,
    studies: &[Study],
    display_sets: &[DisplaySet],
) -> DisplaySetMatchDetails {
    stage
        .display_sets
        .iter()
        .flatten()
        .map(|rule_set| {
            let ranked = match_rule_set(engine, rule_set, studies, display_sets);
            (rule_set.id.clone(), DisplaySetMatch::from_ranked(ranked))
        })
        .collect()
}

/// All candidates passing the rule set's required rules, best first.
pub fn match_rule_set(
    engine: &MatchEngine<'_>,
    rule_set: &DisplaySetRuleSet,
    studies: &[Study],
    display_sets: &[DisplaySet],
) -> Vec<CandidateMatch> {
    let mut candidates = Vec::new();

    for study in studies {
        let study_context = MatchContext {
            studies,
            display_sets,
            instance: None,
        };
        let study_match = engine.find_match(
            &Subject::Study(study),
            &rule_set.study_matching_rules,
            &study_context,
        );
        if study_match.required_failed {
            continue;
        }

        for display_set in display_sets
            .iter()
            .filter(|ds| ds.study_instance_uid == study.study_instance_uid)
        {
            let series_context = MatchContext {
                studies,
                display_sets,
                instance: display_set.images.first(),
            };
            let series_match = engine.find_match(
                &Subject::DisplaySet(display_set),
                &rule_set.series_matching_rules,
                &series_context,
            );
            if series_match.required_failed {
                continue;
            }

            let mut details = MatchDetail::default();
            details.extend(&series_match.details);
            details.extend(&study_match.details);

            let total = series_match.score + study_match.score;
            candidates.push(CandidateMatch {
                study_instance_uid: display_set.study_instance_uid.clone(),
                series_instance_uid: display_set.series_instance_uid.clone(),
                display_set_instance_uid: display_set.display_set_instance_uid.clone(),
                matching_score: total,
                match_details: details,
                sorting_info: SortingInfo {
                    score: total,
                    study: study.study_instance_uid.clone(),
                    series: display_set.series_number(),
                },
            });
        }
    }

    if candidates.is_empty() {
        debug!(rule_set = %rule_set.id, "No match found");
    }

    candidates.sort_by(rank);
    candidates
}

/// Score descending, then study UID descending, then series number ascending (unknown last).
fn rank(a: &CandidateMatch, b: &CandidateMatch) -> Ordering {
    let (a, b) = (&a.sorting_info, &b.sorting_info);
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.study.cmp(&a.study))
        .then_with(|| match (a.series, b.series) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}
