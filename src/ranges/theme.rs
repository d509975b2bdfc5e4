//! Text themes and decorations
//!
//! Both are thin values stored in [`OverlappingRanges`] registries. A theme
//! provider contributes styled ranges on one layer; providers on later
//! layers override earlier ones. Decoration providers carry annotated
//! ranges (squiggles, markers) with no merging semantics. The owning
//! interpretation patches every provider with the character-level table of
//! each modification.

use super::OverlappingRanges;

pub type Color = [u8; 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
    Oblique,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
}

/// A partial style; unset fields defer to lower layers or the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThemeSpec {
    pub color: Option<Color>,
    pub style: Option<FontStyle>,
    pub weight: Option<FontWeight>,
}

impl ThemeSpec {
    /// Overlays `other` on top of this spec.
    pub fn overridden_by(mut self, other: &ThemeSpec) -> ThemeSpec {
        if other.color.is_some() {
            self.color = other.color;
        }
        if other.style.is_some() {
            self.style = other.style;
        }
        if other.weight.is_some() {
            self.weight = other.weight;
        }
        self
    }
}

/// Layer of a theme provider. Exact results (e.g. from a language server)
/// override approximate ones (e.g. from a lexer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThemeLayer {
    Approximate,
    Exact,
}

/// Token identifying a registered provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderToken(usize);

struct ThemeProvider {
    layer: ThemeLayer,
    ranges: OverlappingRanges<ThemeSpec>,
}

/// Ordered collection of theme providers for one interpretation.
#[derive(Default)]
pub struct ThemeProviders {
    providers: Vec<Option<ThemeProvider>>,
}

impl ThemeProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(&mut self, layer: ThemeLayer) -> ProviderToken {
        self.providers.push(Some(ThemeProvider {
            layer,
            ranges: OverlappingRanges::new(),
        }));
        ProviderToken(self.providers.len() - 1)
    }

    pub fn remove_provider(&mut self, token: ProviderToken) {
        if let Some(slot) = self.providers.get_mut(token.0) {
            *slot = None;
        }
    }

    /// The range storage of a provider.
    pub fn ranges_mut(&mut self, token: ProviderToken) -> Option<&mut OverlappingRanges<ThemeSpec>> {
        self.providers
            .get_mut(token.0)
            .and_then(|p| p.as_mut())
            .map(|p| &mut p.ranges)
    }

    /// Patches every provider across one modification.
    pub fn on_modification(&mut self, start: usize, removed: usize, inserted: usize) {
        for provider in self.providers.iter_mut().flatten() {
            provider.ranges.on_modification(start, removed, inserted);
        }
    }

    /// Computes the merged style at `pos` and the position where it may
    /// next change (the nearest boundary of any contributing range).
    pub fn theme_at(&self, pos: usize) -> (ThemeSpec, Option<usize>) {
        let mut merged_by_layer: [ThemeSpec; 2] = [ThemeSpec::default(); 2];
        let mut next_change: Option<usize> = None;
        let mut note_boundary = |boundary: usize| {
            if boundary > pos {
                next_change = Some(next_change.map_or(boundary, |b| b.min(boundary)));
            }
        };
        for provider in self.providers.iter().flatten() {
            let ranges = &provider.ranges;
            let query = ranges.find_intersecting(pos);
            let mut at = query.begin;
            while !at.is_end() && at.cursor() != query.end.cursor() {
                let start = ranges.range_start(at);
                let rec = ranges.record(at).expect("query inside registry");
                let end = start + rec.length;
                if start <= pos && pos < end {
                    let slot = &mut merged_by_layer[provider.layer as usize];
                    *slot = slot.overridden_by(&rec.value);
                    note_boundary(end);
                }
                at = ranges.find_next_ending_after(pos + 1, at);
            }
            // the start of the next range is also a change boundary
            if !query.end.is_end() {
                note_boundary(ranges.range_start(query.end));
            }
        }
        let merged = merged_by_layer[0].overridden_by(&merged_by_layer[1]);
        (merged, next_change)
    }
}

/// A decorated range: an application-assigned kind plus an intensity
/// cookie (e.g. diagnostic severity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decoration {
    pub kind: u32,
    pub cookie: u32,
}

/// One source of decorations (diagnostics, search results, ...).
#[derive(Default)]
pub struct DecorationProvider {
    pub decorations: OverlappingRanges<Decoration>,
}

/// Set of decoration providers for one interpretation.
#[derive(Default)]
pub struct DecorationProviders {
    providers: Vec<Option<DecorationProvider>>,
}

impl DecorationProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(&mut self) -> ProviderToken {
        self.providers.push(Some(DecorationProvider::default()));
        ProviderToken(self.providers.len() - 1)
    }

    pub fn remove_provider(&mut self, token: ProviderToken) {
        if let Some(slot) = self.providers.get_mut(token.0) {
            *slot = None;
        }
    }

    pub fn provider_mut(&mut self, token: ProviderToken) -> Option<&mut DecorationProvider> {
        self.providers.get_mut(token.0).and_then(|p| p.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = &DecorationProvider> {
        self.providers.iter().flatten()
    }

    pub fn on_modification(&mut self, start: usize, removed: usize, inserted: usize) {
        for provider in self.providers.iter_mut().flatten() {
            provider.decorations.on_modification(start, removed, inserted);
        }
    }
}
