// Copyright (C) 2025 aidan-es. Licensed under the GNU AGPLv3.
use crate::document::{DocumentTree, StyleProperty, StyleReader};
use crate::extensions::colour::AdjustContrast as _;
use crate::types::{Colour, ColourParseError};
use std::collections::HashMap;
use std::hash::Hash;

/// Final opaque background colours, keyed by the element they belong to.
///
/// An entry is authoritative for the rest of a correction run: it is never
/// recomputed, so ancestors shared by many text elements are walked once.
#[derive(Debug, Clone)]
pub struct BackgroundCache<E> {
    colours: HashMap<E, Colour>,
}

impl<E> Default for BackgroundCache<E> {
    fn default() -> Self {
        Self {
            colours: HashMap::new(),
        }
    }
}

impl<E: Copy + Eq + Hash> BackgroundCache<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, element: E) -> Option<Colour> {
        self.colours.get(&element).copied()
    }

    /// Records the resolved colour of `element`. Only opaque colours may be cached.
    pub fn insert(&mut self, element: E, colour: Colour) {
        debug_assert!(colour.is_opaque(), "cached backgrounds must be opaque");
        self.colours.insert(element, colour);
    }

    pub fn contains(&self, element: E) -> bool {
        self.colours.contains_key(&element)
    }
}

/// Resolves the opaque colour painted behind an element by compositing the
/// backgrounds of its ancestor chain, outermost first.
pub struct BackgroundResolver<'a, D, S> {
    tree: &'a D,
    styles: &'a S,
    default_background: Colour,
}

impl<'a, D, S> BackgroundResolver<'a, D, S>
where
    D: DocumentTree,
    S: StyleReader<D::Element>,
{
    /// `default_background` is used when no ancestor is opaque; it must be opaque itself.
    pub fn new(tree: &'a D, styles: &'a S, default_background: Colour) -> Self {
        debug_assert!(default_background.is_opaque());
        Self {
            tree,
            styles,
            default_background,
        }
    }

    /// Background colour of a single element, from the cache or its declared style.
    fn own_background(
        &self,
        element: D::Element,
        cache: &BackgroundCache<D::Element>,
    ) -> Result<Colour, ColourParseError> {
        match cache.get(element) {
            Some(colour) => Ok(colour),
            None => self
                .styles
                .computed(element, StyleProperty::BackgroundColor)
                .parse(),
        }
    }

    /// Walks up from `element` to the first opaque background (or the root), then
    /// folds the translucent layers back down, caching each ancestor's result.
    pub fn resolve(
        &self,
        element: D::Element,
        cache: &mut BackgroundCache<D::Element>,
    ) -> Result<Colour, ColourParseError> {
        let mut layers: Vec<(D::Element, Colour)> = Vec::new();
        let mut seed = self.default_background;
        let mut current = Some(element);

        while let Some(el) = current {
            let colour = self.own_background(el, cache)?;
            layers.push((el, colour));
            if colour.is_opaque() {
                seed = colour;
                break;
            }
            current = self.tree.parent(el);
        }

        let mut resolved = seed;
        for (el, colour) in layers.into_iter().rev() {
            if !colour.is_transparent() {
                resolved = colour.as_opaque(&resolved);
            }
            cache.insert(el, resolved);
        }

        log::trace!("background of {element:?} is {resolved}");
        Ok(resolved)
    }
}
