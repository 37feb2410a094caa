//
// binder.rs
// Dicom-Hanging-rs
//
// Resolves a viewport declaration into concrete display sets using the stage's ranked matches.
//
// Thales Matheus Mendonça Santos - November 2025

use tracing::warn;

use crate::models::{Diagnostic, DisplaySetInfo, DisplaySetMatchDetails, ViewportMatch};
use crate::protocol::ViewportSpec;

/// Bind one viewport. References without a candidate at the requested rank are skipped and
/// reported, so the viewport may end up with fewer display sets than declared.
pub fn bind_viewport(
    viewport_index: usize,
    spec: &ViewportSpec,
    matches: &DisplaySetMatchDetails,
) -> (ViewportMatch, Vec<Diagnostic>) {
    let mut display_sets_info = Vec::with_capacity(spec.display_sets.len());
    let mut diagnostics = Vec::new();

    for reference in &spec.display_sets {
        let candidate = matches
            .get(&reference.id)
            .and_then(|m| m.candidate(reference.display_set_index));

        match candidate {
            Some(candidate) => display_sets_info.push(DisplaySetInfo {
                series_instance_uid: candidate.series_instance_uid.clone(),
                display_set_instance_uid: candidate.display_set_instance_uid.clone(),
                display_set_options: reference.options.clone(),
            }),
            None => {
                warn!(
                    viewport = viewport_index,
                    display_set = %reference.id,
                    index = reference.display_set_index,
                    "Viewport requests a display set that the matching rules did not match"
                );
                diagnostics.push(Diagnostic::UnmatchedDisplaySet {
                    viewport_index,
                    rule_set_id: reference.id.clone(),
                    display_set_index: reference.display_set_index,
                });
            }
        }
    }

    let viewport = ViewportMatch {
        viewport_options: spec.viewport_options.clone(),
        display_sets_info,
    };
    (viewport, diagnostics)
}
