//! Annotation store: hole positions on reference images and the rendered
//! annotated-image artifacts.
//!
//! The store is a plain upsert map from hole id to (image, pixel position);
//! any UI toolkit can drive it. Rendering composites every annotation of an
//! image onto its source pixels and is deterministic for a given annotation
//! set, so the output doubles as a golden-image regression check.

use crate::error::{AppResult, WizardError};
use crate::render;
use crate::session::{HoleId, SessionPlan};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const MARKER_RADIUS: i64 = 9;
const MARKER_FILL: Rgba<u8> = Rgba([200, 20, 20, 255]);
const MARKER_TEXT: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// The recorded pixel position of a hole marker on a specific image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub hole: HoleId,
    pub image: usize,
    pub position: (u32, u32),
}

/// All annotations of a session, keyed by hole.
///
/// Reference validation (does the hole exist, is it assigned to that image,
/// is the session still unlocked) lives on [`crate::session::Session`]; the
/// store itself only holds positions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AnnotationStore {
    entries: BTreeMap<HoleId, Annotation>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places or moves the annotation for a hole. Idempotent.
    pub fn upsert(&mut self, hole: HoleId, image: usize, position: (u32, u32)) {
        self.entries.insert(
            hole,
            Annotation {
                hole,
                image,
                position,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The image and position a hole is annotated at, if any.
    pub fn position_of(&self, hole: HoleId) -> Option<(usize, (u32, u32))> {
        self.entries.get(&hole).map(|a| (a.image, a.position))
    }

    /// Annotations on one image, in hole-letter order.
    pub fn for_image(&self, image: usize) -> Vec<&Annotation> {
        self.entries.values().filter(|a| a.image == image).collect()
    }

    /// Succeeds iff every hole of the plan has exactly one annotation;
    /// otherwise fails with the missing hole ids in letter order.
    pub fn validate_coverage(&self, plan: &SessionPlan) -> AppResult<()> {
        let missing: Vec<HoleId> = plan
            .holes()
            .iter()
            .copied()
            .filter(|h| !self.entries.contains_key(h))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(WizardError::IncompleteCoverage(missing))
        }
    }

    /// Composites this image's markers onto the given source pixels.
    ///
    /// Pure function of the source and the annotation set; markers are drawn
    /// in hole-letter order so overlaps resolve the same way every time.
    pub fn composite(&self, source: &RgbaImage, image: usize) -> RgbaImage {
        let mut out = source.clone();
        for annotation in self.for_image(image) {
            let (x, y) = annotation.position;
            let (cx, cy) = (x as i64, y as i64);
            render::draw_disc(&mut out, cx, cy, MARKER_RADIUS, MARKER_FILL);
            render::draw_text_centered(
                &mut out,
                cx + 1,
                cy - render::GLYPH_HEIGHT as i64 / 2,
                &annotation.hole.to_string(),
                1,
                MARKER_TEXT,
            );
        }
        out
    }

    /// Loads the image's source file and composites its markers.
    pub fn render_annotated_image(&self, plan: &SessionPlan, image: usize) -> AppResult<RgbaImage> {
        let spec = plan.image(image)?;
        let source = image::open(&spec.source)?.to_rgba8();
        Ok(self.composite(&source, image))
    }

    /// Renders and writes the annotated-image artifact for one image,
    /// returning its path (`labeled_img_<k>.png` under the asset dir).
    pub fn write_annotated_image(
        &self,
        plan: &SessionPlan,
        image: usize,
        asset_dir: &Path,
    ) -> AppResult<PathBuf> {
        let rendered = self.render_annotated_image(plan, image)?;
        let path = asset_dir.join(format!("labeled_img_{image}.png"));
        rendered.save(&path)?;
        log::info!("Wrote annotated image '{}'", path.display());
        Ok(path)
    }
}
