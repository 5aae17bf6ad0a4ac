// Copyright (C) 2025 aidan-es. Licensed under the GNU AGPLv3.
//! The correction pipeline: seed image backgrounds, compute every correction
//! from the untouched document, then write them all at once.
use crate::background::{BackgroundCache, BackgroundResolver};
use crate::config::Settings;
use crate::document::{CorrectedProperty, DocumentTree, StyleProperty, StyleReader, StyleWriter};
use crate::extensions::colour::AdjustContrast as _;
use crate::image_colour::{
    ImageColourResolver, ImageSource, Quantizer, SeedReport, find_image_ancestors,
};
use crate::types::{Colour, ColourParseError};

/// A style value to write once every read has happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction<E> {
    pub element: E,
    pub property: CorrectedProperty,
    pub value: String,
}

/// The ordered corrections computed from one pass over a document.
///
/// Only the planning phase can build one and only [`CorrectionPlan::apply`]
/// consumes it, so no write can leak into the reads it was computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionPlan<E> {
    corrections: Vec<Correction<E>>,
}

impl<E: Copy> CorrectionPlan<E> {
    fn new() -> Self {
        Self {
            corrections: Vec::new(),
        }
    }

    fn push(&mut self, element: E, property: CorrectedProperty, value: String) {
        self.corrections.push(Correction {
            element,
            property,
            value,
        });
    }

    pub fn corrections(&self) -> &[Correction<E>] {
        &self.corrections
    }

    /// Writes every correction in order, returning how many were written.
    pub fn apply<W: StyleWriter<E>>(self, writer: &mut W) -> usize
    where
        E: std::fmt::Debug,
    {
        let count = self.corrections.len();
        for correction in self.corrections {
            log::debug!(
                "{:?}: {} = {}",
                correction.element,
                correction.property,
                correction.value
            );
            writer.set_important(correction.element, correction.property, &correction.value);
        }
        count
    }
}

/// Counts describing a correction run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CorrectionSummary {
    pub text_elements: usize,
    pub images: SeedReport,
    pub colour_corrections: usize,
    /// Colour corrections that changed more than the alpha flattening.
    pub contrast_adjustments: usize,
    pub weight_corrections: usize,
    pub failures: usize,
    pub written: usize,
}

/// Reads a computed `font-weight`, understanding the CSS keywords.
pub fn parse_font_weight(value: &str) -> Option<f32> {
    match value.trim() {
        "normal" => Some(400.0),
        "bold" | "bolder" => Some(700.0),
        "lighter" => Some(100.0),
        number => number.parse::<f32>().ok().filter(|weight| weight.is_finite()),
    }
}

/// Foreground and background of one text element after resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedColours {
    pub background: Colour,
    /// The declared colour flattened onto the background, before any contrast change.
    pub foreground: Colour,
    pub corrected: Colour,
}

/// Corrects low-contrast and thin text across a document.
#[derive(Debug, Clone)]
pub struct ContrastCorrector {
    settings: Settings,
}

impl ContrastCorrector {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: settings.sanitised(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Runs both passes over `document` and applies the result.
    pub async fn run<D, I, Q>(
        &self,
        document: &mut D,
        images: &I,
        quantizer: &Q,
    ) -> CorrectionSummary
    where
        D: DocumentTree
            + StyleReader<<D as DocumentTree>::Element>
            + StyleWriter<<D as DocumentTree>::Element>,
        I: ImageSource,
        Q: Quantizer,
    {
        let elements = document.text_elements();
        let mut cache = BackgroundCache::new();

        let seeded = self
            .seed_image_backgrounds(&*document, &*document, &elements, images, quantizer, &mut cache)
            .await;
        let (plan, mut summary) =
            self.plan_corrections(&*document, &*document, &elements, &mut cache);
        summary.images = seeded;
        summary.written = plan.apply(document);

        log::info!(
            "Corrected {} text element(s): {} colour adjustment(s), {} font weight(s), {} failure(s)",
            summary.text_elements,
            summary.contrast_adjustments,
            summary.weight_corrections,
            summary.failures
        );
        summary
    }

    /// First pass: resolve the background images behind `elements` into the cache.
    ///
    /// Completes once every image has settled or the configured deadline passes.
    pub async fn seed_image_backgrounds<D, S, I, Q>(
        &self,
        tree: &D,
        styles: &S,
        elements: &[D::Element],
        images: &I,
        quantizer: &Q,
        cache: &mut BackgroundCache<D::Element>,
    ) -> SeedReport
    where
        D: DocumentTree,
        S: StyleReader<D::Element>,
        I: ImageSource,
        Q: Quantizer,
    {
        let targets = find_image_ancestors(tree, styles, elements);
        if targets.is_empty() {
            return SeedReport::default();
        }
        log::debug!("Resolving {} background image(s)", targets.len());
        ImageColourResolver::new(
            images,
            quantizer,
            self.settings.palette_size,
            self.settings.image_deadline(),
        )
        .seed(targets, cache)
        .await
    }

    /// Second pass: read every element and queue its corrections without writing anything.
    pub fn plan_corrections<D, S>(
        &self,
        tree: &D,
        styles: &S,
        elements: &[D::Element],
        cache: &mut BackgroundCache<D::Element>,
    ) -> (CorrectionPlan<D::Element>, CorrectionSummary)
    where
        D: DocumentTree,
        S: StyleReader<D::Element>,
    {
        let resolver = BackgroundResolver::new(tree, styles, self.settings.default_background);
        let mut plan = CorrectionPlan::new();
        let mut summary = CorrectionSummary {
            text_elements: elements.len(),
            ..CorrectionSummary::default()
        };

        plan.push(
            tree.root(),
            CorrectedProperty::ScrollbarColor,
            self.settings.scrollbar_style(),
        );

        for &element in elements {
            if self.needs_weight_correction(styles, element) {
                plan.push(
                    element,
                    CorrectedProperty::FontWeight,
                    self.settings.min_font_weight.to_string(),
                );
                summary.weight_corrections += 1;
            }

            match self.resolve_colours(&resolver, styles, element, cache) {
                Ok(colours) => {
                    if colours.corrected != colours.foreground {
                        summary.contrast_adjustments += 1;
                    }
                    plan.push(element, CorrectedProperty::Color, colours.corrected.to_string());
                    summary.colour_corrections += 1;
                }
                Err(e) => {
                    log::error!("Skipping colour correction of {element:?}: {e}");
                    summary.failures += 1;
                }
            }
        }

        (plan, summary)
    }

    fn needs_weight_correction<E, S>(&self, styles: &S, element: E) -> bool
    where
        E: Copy + std::fmt::Debug,
        S: StyleReader<E>,
    {
        let value = styles.computed(element, StyleProperty::FontWeight);
        match parse_font_weight(&value) {
            Some(weight) => weight < f32::from(self.settings.min_font_weight),
            None => {
                log::warn!("Ignoring unreadable font-weight '{value}' of {element:?}");
                false
            }
        }
    }

    /// Resolves the background behind `element`, flattens its colour onto it and
    /// raises the contrast to the configured target.
    pub fn resolve_colours<D, S>(
        &self,
        resolver: &BackgroundResolver<'_, D, S>,
        styles: &S,
        element: D::Element,
        cache: &mut BackgroundCache<D::Element>,
    ) -> Result<ResolvedColours, ColourParseError>
    where
        D: DocumentTree,
        S: StyleReader<D::Element>,
    {
        let background = resolver.resolve(element, cache)?;
        let declared: Colour = styles.computed(element, StyleProperty::Color).parse()?;
        let foreground = declared.as_opaque(&background);
        let corrected = foreground.contrast_to(&background, self.settings.desired_contrast);
        Ok(ResolvedColours {
            background,
            foreground,
            corrected,
        })
    }
}
