//! Session data model: holes, images, the test plan, and the aggregate root.
//!
//! A session is configured once during setup (hole count, sample count, image
//! assignment), annotated, and then frozen the moment the first measurement is
//! recorded. All setup mutations go through [`Session`], which enforces the
//! lock; the plan itself is a plain value type.
//!
//! Hole identifiers are letters assigned by ordinal position (A, B, C, ...),
//! capped at 26 per session. Holes are presented to the operator in image
//! order first (all holes on image 1 before any hole on image 2), then in
//! letter order within an image. For manually built plans the assignment is
//! contiguous, so this coincides with plain letter order.

use crate::annotation::AnnotationStore;
use crate::config::Preset;
use crate::error::{AppResult, WizardError};
use crate::results::ResultsStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Upper bound on holes per session, one per letter of the alphabet.
pub const MAX_HOLES: usize = 26;

/// A single screw position under test, identified by a letter.
///
/// Internally stored as a zero-based ordinal; displayed and serialized as the
/// corresponding uppercase letter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct HoleId(u8);

impl HoleId {
    /// Builds a hole id from its zero-based ordinal position.
    ///
    /// Ordinals at or beyond [`MAX_HOLES`] saturate to 'Z'; plan validation
    /// rejects such counts before ids are ever generated.
    pub fn from_ordinal(ordinal: usize) -> Self {
        Self(ordinal.min(MAX_HOLES - 1) as u8)
    }

    /// Zero-based ordinal position (A = 0).
    pub fn ordinal(&self) -> usize {
        self.0 as usize
    }

    /// The identifier letter ('A'..='Z').
    pub fn letter(&self) -> char {
        (b'A' + self.0) as char
    }

    /// Parses a single uppercase letter into a hole id.
    pub fn parse(s: &str) -> AppResult<Self> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c @ 'A'..='Z'), None) => Ok(Self(c as u8 - b'A')),
            _ => Err(WizardError::InvalidConfig(format!(
                "invalid hole identifier '{s}', expected a single letter A-Z"
            ))),
        }
    }
}

impl fmt::Display for HoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl From<HoleId> for String {
    fn from(id: HoleId) -> Self {
        id.letter().to_string()
    }
}

impl TryFrom<String> for HoleId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        HoleId::parse(&s).map_err(|e| e.to_string())
    }
}

/// One complete pass measuring every hole once. One-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SampleIndex(pub u32);

impl fmt::Display for SampleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference image with the holes assigned to it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageSpec {
    /// One-based image sequence index.
    pub index: usize,
    /// Source file as supplied by the operator.
    pub source: PathBuf,
    /// Holes on this image, in letter order.
    pub holes: Vec<HoleId>,
}

/// Operator-supplied image file plus the number of holes it carries.
///
/// The count may be omitted for a single-image plan, in which case the image
/// receives every hole.
#[derive(Clone, Debug)]
pub struct ImageAssignment {
    pub source: PathBuf,
    pub hole_count: Option<usize>,
}

impl ImageAssignment {
    pub fn new(source: impl Into<PathBuf>, hole_count: usize) -> Self {
        Self {
            source: source.into(),
            hole_count: Some(hole_count),
        }
    }

    /// Single-image shorthand: the image takes every hole.
    pub fn whole(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            hole_count: None,
        }
    }
}

/// The frozen configuration of a session: hole ids, sample count, and the
/// hole-to-image assignment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionPlan {
    holes: Vec<HoleId>,
    sample_count: u32,
    images: Vec<ImageSpec>,
    /// Preset plans come with pre-labeled images; annotation is skipped.
    #[serde(default)]
    preset: bool,
}

impl SessionPlan {
    /// Builds and validates a plan from operator input.
    ///
    /// Fails with `InvalidConfig` on bad counts and `CoverageMismatch` when
    /// the per-image hole counts of a multi-image plan do not sum to the hole
    /// count exactly. Holes are assigned to images contiguously in image
    /// order.
    pub fn new(
        hole_count: usize,
        sample_count: u32,
        images: Vec<ImageAssignment>,
    ) -> AppResult<Self> {
        if hole_count < 1 || hole_count > MAX_HOLES {
            return Err(WizardError::InvalidConfig(format!(
                "hole count must be 1-{MAX_HOLES}, got {hole_count}"
            )));
        }
        if sample_count < 1 {
            return Err(WizardError::InvalidConfig(
                "sample count must be at least 1".into(),
            ));
        }
        if images.is_empty() {
            return Err(WizardError::InvalidConfig(
                "at least one image is required".into(),
            ));
        }
        if images.len() > hole_count {
            return Err(WizardError::InvalidConfig(format!(
                "image count {} exceeds hole count {hole_count}",
                images.len()
            )));
        }

        let holes: Vec<HoleId> = (0..hole_count).map(HoleId::from_ordinal).collect();

        let counts: Vec<usize> = if images.len() == 1 {
            vec![hole_count]
        } else {
            let counts: Vec<usize> = images
                .iter()
                .map(|a| a.hole_count.unwrap_or(0))
                .collect();
            let assigned: usize = counts.iter().sum();
            if assigned != hole_count {
                return Err(WizardError::CoverageMismatch {
                    expected: hole_count,
                    assigned,
                });
            }
            if counts.iter().any(|&c| c == 0) {
                return Err(WizardError::InvalidConfig(
                    "every image must carry at least one hole".into(),
                ));
            }
            counts
        };

        let mut specs = Vec::with_capacity(images.len());
        let mut next = 0usize;
        for (i, (assignment, count)) in images.into_iter().zip(counts).enumerate() {
            specs.push(ImageSpec {
                index: i + 1,
                source: assignment.source,
                holes: holes[next..next + count].to_vec(),
            });
            next += count;
        }

        Ok(Self {
            holes,
            sample_count,
            images: specs,
            preset: false,
        })
    }

    /// Builds a plan from a named preset (explicit per-image hole letters).
    ///
    /// Preset assignments need not be contiguous; capture order is still
    /// image-major.
    pub fn from_preset(preset: &Preset, sample_count: u32, asset_dir: &Path) -> AppResult<Self> {
        if sample_count < 1 {
            return Err(WizardError::InvalidConfig(
                "sample count must be at least 1".into(),
            ));
        }
        if preset.images.is_empty() {
            return Err(WizardError::InvalidConfig(format!(
                "preset '{}' has no images",
                preset.name
            )));
        }

        let mut specs = Vec::with_capacity(preset.images.len());
        let mut all: Vec<HoleId> = Vec::new();
        for (i, img) in preset.images.iter().enumerate() {
            let mut holes = Vec::with_capacity(img.holes.len());
            for label in &img.holes {
                let id = HoleId::parse(label)?;
                if all.contains(&id) {
                    return Err(WizardError::InvalidConfig(format!(
                        "preset '{}' assigns hole '{id}' twice",
                        preset.name
                    )));
                }
                holes.push(id);
                all.push(id);
            }
            holes.sort();
            specs.push(ImageSpec {
                index: i + 1,
                source: asset_dir.join(&img.file),
                holes,
            });
        }
        all.sort();
        if all.is_empty() || all.len() > MAX_HOLES {
            return Err(WizardError::InvalidConfig(format!(
                "preset '{}' must assign 1-{MAX_HOLES} holes",
                preset.name
            )));
        }

        Ok(Self {
            holes: all,
            sample_count,
            images: specs,
            preset: true,
        })
    }

    pub fn holes(&self) -> &[HoleId] {
        &self.holes
    }

    pub fn hole_count(&self) -> usize {
        self.holes.len()
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn images(&self) -> &[ImageSpec] {
        &self.images
    }

    /// True for preset plans, whose images already carry baked-in labels.
    pub fn is_preset(&self) -> bool {
        self.preset
    }

    pub fn image(&self, index: usize) -> AppResult<&ImageSpec> {
        self.images
            .get(index.wrapping_sub(1))
            .ok_or(WizardError::UnknownImage(index))
    }

    pub fn contains_hole(&self, hole: HoleId) -> bool {
        self.holes.contains(&hole)
    }

    /// The image a hole is assigned to.
    pub fn image_of(&self, hole: HoleId) -> AppResult<&ImageSpec> {
        self.images
            .iter()
            .find(|img| img.holes.contains(&hole))
            .ok_or(WizardError::UnknownHole(hole))
    }

    /// Holes in the order the operator works through them: image-major, then
    /// letter order within each image. This is the recording order of every
    /// sample.
    pub fn capture_order(&self) -> Vec<HoleId> {
        self.images
            .iter()
            .flat_map(|img| img.holes.iter().copied())
            .collect()
    }
}

/// Aggregate root owning the plan, annotations, results, and the active
/// torque target.
///
/// The session is "locked" as soon as the first measurement is recorded; from
/// then on all setup mutations fail with `SessionLocked`.
pub struct Session {
    plan: SessionPlan,
    annotations: AnnotationStore,
    results: ResultsStore,
    torque_target_ncm: f64,
}

impl Session {
    pub fn new(plan: SessionPlan, default_target_ncm: f64) -> Self {
        Self {
            plan,
            annotations: AnnotationStore::new(),
            results: ResultsStore::new(),
            torque_target_ncm: default_target_ncm,
        }
    }

    pub fn plan(&self) -> &SessionPlan {
        &self.plan
    }

    pub fn annotations(&self) -> &AnnotationStore {
        &self.annotations
    }

    pub fn results(&self) -> &ResultsStore {
        &self.results
    }

    pub fn results_mut(&mut self) -> &mut ResultsStore {
        &mut self.results
    }

    /// True once testing has started, i.e. at least one measurement exists.
    pub fn locked(&self) -> bool {
        !self.results.is_empty()
    }

    /// Active torque target in N·cm. Carried across samples until changed.
    pub fn torque_target_ncm(&self) -> f64 {
        self.torque_target_ncm
    }

    /// Updates the torque target. Allowed between samples; the state machine
    /// never calls this while a sample is running.
    pub fn set_torque_target_ncm(&mut self, ncm: f64) -> AppResult<()> {
        if !(ncm > 0.0) {
            return Err(WizardError::InvalidConfig(format!(
                "torque target must be positive, got {ncm}"
            )));
        }
        self.torque_target_ncm = ncm;
        Ok(())
    }

    /// Replaces the plan wholesale. Refused once locked.
    pub fn replace_plan(&mut self, plan: SessionPlan) -> AppResult<()> {
        if self.locked() {
            return Err(WizardError::SessionLocked);
        }
        self.annotations = AnnotationStore::new();
        self.plan = plan;
        Ok(())
    }

    /// Places (or moves) the annotation for a hole. Idempotent upsert;
    /// validates hole and image references against the plan.
    pub fn place_annotation(
        &mut self,
        hole: HoleId,
        image: usize,
        position: (u32, u32),
    ) -> AppResult<()> {
        if self.locked() {
            return Err(WizardError::SessionLocked);
        }
        if !self.plan.contains_hole(hole) {
            return Err(WizardError::UnknownHole(hole));
        }
        let spec = self.plan.image(image)?;
        if !spec.holes.contains(&hole) {
            return Err(WizardError::HoleNotOnImage { hole, image });
        }
        self.annotations.upsert(hole, image, position);
        Ok(())
    }

    /// Succeeds iff every hole has exactly one annotation; otherwise lists
    /// the missing hole identifiers.
    pub fn validate_coverage(&self) -> AppResult<()> {
        self.annotations.validate_coverage(&self.plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PresetImage;

    fn two_image_plan() -> SessionPlan {
        SessionPlan::new(
            4,
            2,
            vec![
                ImageAssignment::new("img1.png", 2),
                ImageAssignment::new("img2.png", 2),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_hole_ids_are_letters_in_ordinal_order() {
        for n in [1usize, 5, 26] {
            let plan =
                SessionPlan::new(n, 1, vec![ImageAssignment::whole("img.png")]).unwrap();
            let letters: Vec<char> = plan.holes().iter().map(|h| h.letter()).collect();
            let expected: Vec<char> = (0..n).map(|i| (b'A' + i as u8) as char).collect();
            assert_eq!(letters, expected);
        }
    }

    #[test]
    fn test_invalid_counts_rejected() {
        assert!(matches!(
            SessionPlan::new(0, 1, vec![ImageAssignment::whole("i.png")]),
            Err(WizardError::InvalidConfig(_))
        ));
        assert!(matches!(
            SessionPlan::new(27, 1, vec![ImageAssignment::whole("i.png")]),
            Err(WizardError::InvalidConfig(_))
        ));
        assert!(matches!(
            SessionPlan::new(3, 0, vec![ImageAssignment::whole("i.png")]),
            Err(WizardError::InvalidConfig(_))
        ));
        assert!(matches!(
            SessionPlan::new(3, 1, vec![]),
            Err(WizardError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_coverage_mismatch_on_bad_split() {
        let err = SessionPlan::new(
            5,
            1,
            vec![
                ImageAssignment::new("a.png", 2),
                ImageAssignment::new("b.png", 2),
            ],
        )
        .unwrap_err();
        match err {
            WizardError::CoverageMismatch { expected, assigned } => {
                assert_eq!(expected, 5);
                assert_eq!(assigned, 4);
            }
            other => panic!("expected CoverageMismatch, got {other}"),
        }
    }

    #[test]
    fn test_contiguous_assignment_in_image_order() {
        let plan = two_image_plan();
        assert_eq!(plan.images()[0].holes, vec![HoleId::parse("A").unwrap(), HoleId::parse("B").unwrap()]);
        assert_eq!(plan.images()[1].holes, vec![HoleId::parse("C").unwrap(), HoleId::parse("D").unwrap()]);
        let order: String = plan.capture_order().iter().map(|h| h.letter()).collect();
        assert_eq!(order, "ABCD");
    }

    #[test]
    fn test_preset_plan_non_contiguous() {
        let preset = Preset {
            name: "scube lid GigE".into(),
            images: vec![
                PresetImage {
                    file: "ace_GigE_Lid_A_B_C_D_G.png".into(),
                    holes: vec!["A".into(), "B".into(), "C".into(), "D".into(), "G".into()],
                },
                PresetImage {
                    file: "ace_GigE_Lid_E_F.png".into(),
                    holes: vec!["E".into(), "F".into()],
                },
            ],
        };
        let plan = SessionPlan::from_preset(&preset, 2, Path::new("lib/preset")).unwrap();
        assert_eq!(plan.hole_count(), 7);
        let order: String = plan.capture_order().iter().map(|h| h.letter()).collect();
        assert_eq!(order, "ABCDGEF");
        assert_eq!(plan.image_of(HoleId::parse("G").unwrap()).unwrap().index, 1);
    }

    #[test]
    fn test_annotation_requires_valid_references() {
        let mut session = Session::new(two_image_plan(), 24.0);
        let c = HoleId::parse("C").unwrap();
        // C lives on image 2
        assert!(matches!(
            session.place_annotation(c, 1, (10, 10)),
            Err(WizardError::HoleNotOnImage { .. })
        ));
        assert!(matches!(
            session.place_annotation(c, 3, (10, 10)),
            Err(WizardError::UnknownImage(3))
        ));
        session.place_annotation(c, 2, (10, 10)).unwrap();
        // Upsert is idempotent
        session.place_annotation(c, 2, (40, 60)).unwrap();
        assert_eq!(session.annotations().position_of(c), Some((2, (40, 60))));
    }

    #[test]
    fn test_validate_coverage_lists_missing() {
        let mut session = Session::new(two_image_plan(), 24.0);
        for (hole, image) in [("A", 1), ("B", 1), ("C", 2)] {
            session
                .place_annotation(HoleId::parse(hole).unwrap(), image, (5, 5))
                .unwrap();
        }
        match session.validate_coverage() {
            Err(WizardError::IncompleteCoverage(missing)) => {
                assert_eq!(missing, vec![HoleId::parse("D").unwrap()]);
            }
            other => panic!("expected IncompleteCoverage, got {other:?}"),
        }
        session
            .place_annotation(HoleId::parse("D").unwrap(), 2, (7, 7))
            .unwrap();
        session.validate_coverage().unwrap();
    }
}
