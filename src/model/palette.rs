use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::color::Rgb;

/// A named table of indexed colors, shared by every effect in a scene.
///
/// Insertion order is preserved so a table survives save/load unchanged;
/// *index-based* palette selection (control messages that pass a number
/// instead of a name) always goes through the sorted name list, so it is
/// insensitive to insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaletteTable {
    entries: IndexMap<String, Vec<Rgb>>,
}

impl PaletteTable {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, colors: Vec<Rgb>) {
        self.entries.insert(name.into(), colors);
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[Rgb]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Look up one color. Any unresolvable reference (unknown palette name,
    /// out-of-range index) yields the error color so bad control input
    /// stays visible on the strip instead of failing the frame.
    #[must_use]
    pub fn color_at(&self, name: &str, index: i32) -> Rgb {
        let Some(colors) = self.entries.get(name) else {
            return Rgb::ERROR;
        };
        usize::try_from(index)
            .ok()
            .and_then(|i| colors.get(i))
            .copied()
            .unwrap_or(Rgb::ERROR)
    }

    /// Palette names in sorted order, the ordering used to resolve numeric
    /// palette selectors.
    #[must_use]
    pub fn sorted_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a numeric selector to a palette name via the sorted name list.
    #[must_use]
    pub fn name_by_index(&self, index: i64) -> Option<&str> {
        let names = self.sorted_names();
        usize::try_from(index).ok().and_then(|i| names.get(i).copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Rgb])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// First name in sorted order, used when the active palette disappears
    /// after a bulk replace.
    #[must_use]
    pub fn first_name(&self) -> Option<&str> {
        self.sorted_names().first().copied()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::default_palettes;

    #[test]
    fn defaults_have_five_palettes_of_six_colors() {
        let table = default_palettes();
        assert_eq!(table.len(), 5);
        for name in ["A", "B", "C", "D", "E"] {
            assert_eq!(table.get(name).unwrap().len(), 6, "palette {name}");
        }
        assert_eq!(table.color_at("A", 0), Rgb::new(255, 0, 0));
        assert_eq!(table.color_at("B", 5), Rgb::new(255, 255, 255));
    }

    #[test]
    fn out_of_range_index_yields_error_color() {
        let table = default_palettes();
        assert_eq!(table.color_at("A", 7), Rgb::ERROR);
        assert_eq!(table.color_at("A", -1), Rgb::ERROR);
        assert_eq!(table.color_at("Z", 0), Rgb::ERROR);
    }

    #[test]
    fn numeric_selector_uses_sorted_names() {
        let mut table = PaletteTable::empty();
        table.insert("B", vec![Rgb::BLACK]);
        table.insert("A", vec![Rgb::BLACK]);
        assert_eq!(table.name_by_index(0), Some("A"));
        assert_eq!(table.name_by_index(1), Some("B"));
        assert_eq!(table.name_by_index(2), None);
        assert_eq!(table.name_by_index(-1), None);
    }

    #[test]
    fn round_trips_through_json_preserving_order() {
        let mut table = PaletteTable::empty();
        table.insert("Z", vec![Rgb::new(1, 2, 3)]);
        table.insert("A", vec![Rgb::new(4, 5, 6), Rgb::new(7, 8, 9)]);
        let json = serde_json::to_string(&table).unwrap();
        let back: PaletteTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
        // insertion order survives the round trip
        assert_eq!(back.iter().next().unwrap().0, "Z");
    }
}
