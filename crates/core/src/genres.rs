//! Catalog genre → host tag mapping.

use std::collections::{BTreeMap, HashMap};

/// Lower-cased genre name → tags. Genres without an entry produce no tags.
#[derive(Debug, Clone, Default)]
pub struct GenreTagMap {
    table: HashMap<String, Vec<String>>,
}

impl GenreTagMap {
    pub fn from_table(table: &BTreeMap<String, Vec<String>>) -> Self {
        let table = table
            .iter()
            .map(|(genre, tags)| (genre.trim().to_lowercase(), tags.clone()))
            .collect();
        Self { table }
    }

    /// Tags for the given genres, deduplicated in first-seen order.
    pub fn map_genres<S: AsRef<str>>(&self, genres: &[S]) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for genre in genres {
            let Some(mapped) = self.table.get(&genre.as_ref().trim().to_lowercase()) else {
                continue;
            };
            for tag in mapped {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
        }
        tags
    }
}
