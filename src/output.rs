use std::io::{self, Write};

use serde::Serialize;

use crate::domain::{Category, Cell, display_label};
use crate::store::{BaseData, FeatureVector, StoreStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureListResult {
    pub category: Category,
    pub total: usize,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopCell {
    pub id: String,
    pub slice: String,
    pub region: String,
    pub value: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowResult {
    pub feature: String,
    pub label: String,
    pub category: Category,
    pub cells: usize,
    pub non_zero: usize,
    pub top: Vec<TopCell>,
}

impl ShowResult {
    /// Cells with the largest values, ties broken by cell order.
    pub fn build(
        name: &str,
        category: Category,
        base: &BaseData,
        vector: &FeatureVector,
        limit: usize,
    ) -> Self {
        let mut ranked: Vec<(usize, f32)> = vector
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, value)| *value != 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        let top = ranked
            .into_iter()
            .filter_map(|(position, value)| {
                let cell = base.cells().get(position)?;
                Some(TopCell {
                    id: cell.id.clone(),
                    slice: cell.slice.clone(),
                    region: cell.region.clone(),
                    value,
                })
            })
            .take(limit)
            .collect();
        Self {
            feature: name.to_string(),
            label: display_label(name),
            category,
            cells: vector.len(),
            non_zero: vector.non_zero(),
            top,
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_stats(stats: &StoreStats) -> io::Result<()> {
        Self::print_json(stats)
    }

    pub fn print_features(result: &FeatureListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_show(result: &ShowResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_cell(cell: &Cell) -> io::Result<()> {
        Self::print_json(cell)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct HumanOutput;

impl HumanOutput {
    pub fn print_stats(stats: &StoreStats) {
        println!("cells:           {}", stats.cells);
        println!("genes:           {}", stats.genes);
        println!("tf activities:   {}", stats.tfs);
        println!("cached features: {}", stats.cached_features);
        println!("raw buffers:     {}", stats.raw_buffers);
    }

    pub fn print_features(result: &FeatureListResult) {
        println!("{} ({} total)", result.category, result.total);
        for name in &result.features {
            println!("  {}", display_label(name));
        }
    }

    pub fn print_show(result: &ShowResult) {
        println!(
            "{} [{}]: {} of {} cells non-zero",
            result.label, result.category, result.non_zero, result.cells
        );
        for cell in &result.top {
            println!(
                "  {:<24} {:<10} {:<20} {:>10.4}",
                cell.id, cell.slice, cell.region, cell.value
            );
        }
    }

    pub fn print_cell(cell: &Cell) {
        println!("id:     {}", cell.id);
        println!("x, y:   {}, {}", cell.x, cell.y);
        println!("slice:  {}", cell.slice);
        println!("region: {}", cell.region);
    }
}
