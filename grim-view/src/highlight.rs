//! Named highlight groups, links between them, and per-buffer namespaces of
//! extra styled ranges.

use std::collections::HashMap;

use bitflags::bitflags;
use thiserror::Error;

use crate::buffer::BufferId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parse `rrggbb` with an optional leading `#`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 {
            return None;
        }
        match [0..2, 2..4, 4..6].map(|i| hex.get(i).and_then(|c| u8::from_str_radix(c, 16).ok())) {
            [Some(r), Some(g), Some(b)] => Some(Self::rgb(r, g, b)),
            _ => None,
        }
    }

    /// Channel-wise linear interpolation between `self` and `other`.
    /// Interpolates raw sRGB values without gamma correction; good enough
    /// for UI fades.
    pub fn blend(self, other: Color, ratio: f32) -> Color {
        let ratio = ratio.clamp(0.0, 1.0);
        let lerp = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * ratio).round() as u8;
        Color {
            r: lerp(self.r, other.r),
            g: lerp(self.g, other.g),
            b: lerp(self.b, other.b),
            a: lerp(self.a, other.a),
        }
    }
}

bitflags! {
    /// Text attributes attached to a highlight group.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StyleFlags: u8 {
        const BOLD          = 0b0000_0001;
        const ITALIC        = 0b0000_0010;
        const UNDERLINE     = 0b0000_0100;
        const UNDERCURL     = 0b0000_1000;
        const STRIKETHROUGH = 0b0001_0000;
        const REVERSE       = 0b0010_0000;
        const STANDOUT      = 0b0100_0000;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HighlightGroup {
    pub id: u32,
    pub name: String,
    pub fg: Option<Color>,
    pub bg: Option<Color>,
    /// Special color, used for underlines.
    pub sp: Option<Color>,
    pub style: StyleFlags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceHighlight {
    pub buffer_id: BufferId,
    pub line: usize,
    pub col_start: usize,
    pub col_end: usize,
    pub group_id: u32,
}

#[derive(Debug)]
pub struct Namespace {
    pub id: u32,
    pub name: String,
    highlights: Vec<NamespaceHighlight>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HighlightError {
    #[error("unknown namespace {0}")]
    UnknownNamespace(u32),
    #[error("unknown highlight group `{0}`")]
    UnknownGroup(String),
}

/// Registry of highlight groups and namespaces. Group ids are assigned at
/// definition time and stay stable across redefinitions; namespace ids are
/// monotonic per registry.
#[derive(Debug, Default)]
pub struct HighlightRegistry {
    groups: Vec<HighlightGroup>,
    by_name: HashMap<String, u32>,
    links: HashMap<String, String>,
    namespaces: Vec<Namespace>,
}

impl HighlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define or redefine a highlight group. Redefinition replaces the
    /// stored attributes but keeps the id.
    pub fn define(
        &mut self,
        name: &str,
        fg: Option<Color>,
        bg: Option<Color>,
        sp: Option<Color>,
        style: StyleFlags,
    ) -> u32 {
        if let Some(&id) = self.by_name.get(name) {
            self.groups[id as usize] = HighlightGroup {
                id,
                name: name.to_string(),
                fg,
                bg,
                sp,
                style,
            };
            return id;
        }

        let id = self.groups.len() as u32;
        self.groups.push(HighlightGroup {
            id,
            name: name.to_string(),
            fg,
            bg,
            sp,
            style,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Link `from` to `to`; lookups of `from` resolve through `to`.
    pub fn link(&mut self, from: &str, to: &str) {
        self.links.insert(from.to_string(), to.to_string());
    }

    pub fn group(&self, name: &str) -> Option<&HighlightGroup> {
        self.by_name.get(name).map(|&id| &self.groups[id as usize])
    }

    pub fn group_by_id(&self, id: u32) -> Option<&HighlightGroup> {
        self.groups.get(id as usize)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Resolve a name through its link chain. Cycles terminate at the last
    /// group resolved before a name repeats.
    pub fn resolve(&self, name: &str) -> Option<&HighlightGroup> {
        let mut visited: Vec<&str> = Vec::new();
        let mut current = name;
        let mut found = None;

        loop {
            if visited.iter().any(|seen| *seen == current) {
                return found;
            }
            visited.push(current);

            if let Some(group) = self.group(current) {
                found = Some(group);
            }

            match self.links.get(current) {
                Some(next) => current = next,
                None => return found,
            }
        }
    }

    pub fn create_namespace(&mut self, name: &str) -> u32 {
        let id = self.namespaces.len() as u32;
        self.namespaces.push(Namespace {
            id,
            name: name.to_string(),
            highlights: Vec::new(),
        });
        id
    }

    pub fn add_namespace_highlight(
        &mut self,
        ns: u32,
        buffer_id: BufferId,
        group_name: &str,
        line: usize,
        col_start: usize,
        col_end: usize,
    ) -> Result<(), HighlightError> {
        let group_id = self
            .resolve(group_name)
            .map(|group| group.id)
            .ok_or_else(|| HighlightError::UnknownGroup(group_name.to_string()))?;
        let namespace = self
            .namespaces
            .get_mut(ns as usize)
            .ok_or(HighlightError::UnknownNamespace(ns))?;

        namespace.highlights.push(NamespaceHighlight {
            buffer_id,
            line,
            col_start,
            col_end,
            group_id,
        });
        Ok(())
    }

    /// Drop namespace highlights, either all of them or only those attached
    /// to one buffer.
    pub fn clear_namespace(
        &mut self,
        ns: u32,
        buffer_id: Option<BufferId>,
    ) -> Result<(), HighlightError> {
        let namespace = self
            .namespaces
            .get_mut(ns as usize)
            .ok_or(HighlightError::UnknownNamespace(ns))?;
        match buffer_id {
            Some(id) => namespace
                .highlights
                .retain(|highlight| highlight.buffer_id != id),
            None => namespace.highlights.clear(),
        }
        Ok(())
    }

    pub fn namespace_highlights(&self, ns: u32) -> Result<&[NamespaceHighlight], HighlightError> {
        self.namespaces
            .get(ns as usize)
            .map(|namespace| namespace.highlights.as_slice())
            .ok_or(HighlightError::UnknownNamespace(ns))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_color_from_hex() {
        assert_eq!(Color::from_hex("#c0ffee"), Some(Color::rgb(192, 255, 238)));
        assert_eq!(Color::from_hex("c0ffee"), Some(Color::rgb(192, 255, 238)));
        assert_eq!(Color::from_hex("#fff"), None);
        assert_eq!(Color::from_hex("zzzzzz"), None);
    }

    #[test]
    fn test_color_blend() {
        let black = Color::rgb(0, 0, 0);
        let white = Color::rgb(255, 255, 255);
        assert_eq!(black.blend(white, 0.0), black);
        assert_eq!(black.blend(white, 1.0), white);
        assert_eq!(black.blend(white, 0.5), Color::rgb(128, 128, 128));
        // ratio is clamped
        assert_eq!(black.blend(white, 2.0), white);
    }

    #[test]
    fn test_define_assigns_stable_ids() {
        let mut registry = HighlightRegistry::new();
        let error = registry.define("Error", Some(Color::rgb(244, 120, 104)), None, None, StyleFlags::BOLD);
        let warning = registry.define("Warning", Some(Color::rgb(255, 205, 28)), None, None, StyleFlags::empty());
        assert_eq!((error, warning), (0, 1));

        // redefinition keeps the id, replaces the attributes
        let again = registry.define("Error", None, None, None, StyleFlags::ITALIC);
        assert_eq!(again, error);
        assert_eq!(registry.group_count(), 2);
        let group = registry.group("Error").unwrap();
        assert_eq!(group.fg, None);
        assert_eq!(group.style, StyleFlags::ITALIC);
    }

    #[test]
    fn test_links_resolve_transitively() {
        let mut registry = HighlightRegistry::new();
        registry.define("Comment", Some(Color::rgb(105, 124, 129)), None, None, StyleFlags::ITALIC);
        registry.link("DocComment", "SpecialComment");
        registry.link("SpecialComment", "Comment");

        let group = registry.resolve("DocComment").unwrap();
        assert_eq!(group.name, "Comment");
    }

    #[test]
    fn test_link_cycle_terminates() {
        let mut registry = HighlightRegistry::new();
        registry.define("A", Some(Color::rgb(1, 2, 3)), None, None, StyleFlags::empty());
        registry.link("A", "B");
        registry.link("B", "A");

        // walks A -> B -> (A revisit) and settles on the group seen last
        let group = registry.resolve("A").unwrap();
        assert_eq!(group.name, "A");

        // a pure link cycle with no defined group resolves to nothing
        registry.link("X", "Y");
        registry.link("Y", "X");
        assert!(registry.resolve("X").is_none());
    }

    #[test]
    fn test_link_cycle_with_two_defined_groups_keeps_last() {
        let mut registry = HighlightRegistry::new();
        registry.define("A", Some(Color::rgb(1, 0, 0)), None, None, StyleFlags::empty());
        registry.define("B", Some(Color::rgb(0, 1, 0)), None, None, StyleFlags::empty());
        registry.link("A", "B");
        registry.link("B", "A");

        // both nodes of the cycle are defined: the walk resolves every
        // group along the chain and stops at the revisit, so the group
        // seen last wins
        assert_eq!(registry.resolve("A").unwrap().name, "B");
        assert_eq!(registry.resolve("B").unwrap().name, "A");
    }

    #[test]
    fn test_namespaces() {
        let mut registry = HighlightRegistry::new();
        registry.define("Search", None, Some(Color::rgb(60, 60, 0)), None, StyleFlags::empty());
        let ns = registry.create_namespace("search-results");
        assert_eq!(ns, 0);
        assert_eq!(registry.create_namespace("diagnostics"), 1);

        registry
            .add_namespace_highlight(ns, 1, "Search", 0, 4, 9)
            .unwrap();
        registry
            .add_namespace_highlight(ns, 2, "Search", 3, 0, 5)
            .unwrap();
        assert_eq!(registry.namespace_highlights(ns).unwrap().len(), 2);

        // clearing one buffer leaves the other's entries
        registry.clear_namespace(ns, Some(1)).unwrap();
        let rest = registry.namespace_highlights(ns).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].buffer_id, 2);

        registry.clear_namespace(ns, None).unwrap();
        assert!(registry.namespace_highlights(ns).unwrap().is_empty());

        assert_eq!(
            registry.add_namespace_highlight(9, 1, "Search", 0, 0, 1),
            Err(HighlightError::UnknownNamespace(9))
        );
        assert_eq!(
            registry.add_namespace_highlight(ns, 1, "NoSuchGroup", 0, 0, 1),
            Err(HighlightError::UnknownGroup("NoSuchGroup".to_string()))
        );
    }
}
