use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tessera_core::Program;
use tessera_material::{MaterialRow, Registry};

use crate::scene::FrameSummary;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgramSummary {
    pub programs: usize,
    pub shaders: usize,
    /// Shader objects reused instead of compiled.
    pub shader_hits: usize,
    /// Programs reused instead of linked.
    pub program_hits: usize,
}

impl ProgramSummary {
    pub fn of(registry: &Registry) -> Self {
        let cache = registry.programs();
        let (shader_hits, program_hits) = cache.hits();
        Self {
            programs: cache.len(),
            shaders: cache.num_shaders(),
            shader_hits,
            program_hits,
        }
    }
}

/// Everything one run found, as written to `--output`.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub materials: Vec<MaterialRow>,
    pub programs: ProgramSummary,
    pub frame: FrameSummary,
    /// Script files dropped for malformed syntax.
    pub rejected: Vec<String>,
    pub invented_images: usize,
}

impl Report {
    /// Materials per iteration strategy.
    pub fn iterator_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.materials {
            *counts.entry(row.iterator).or_insert(0) += 1;
        }
        counts
    }
}

/// Save a report as pretty JSON.
pub fn save_report(path: &Path, report: &Report) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}

/// Write the source of every generated program into `dir`. Returns the
/// number of files written.
pub fn dump_programs(dir: &Path, programs: &[Arc<Program>]) -> std::io::Result<usize> {
    std::fs::create_dir_all(dir)?;
    let mut written = 0;
    for program in programs {
        let stem = format!("program_{}", program.handle);
        let mut shaders = vec![("vert", &program.vertex), ("frag", &program.fragment)];
        if let Some(geometry) = &program.geometry {
            shaders.push(("geom", geometry));
        }
        for (ext, shader) in shaders {
            std::fs::write(dir.join(format!("{stem}.{ext}")), &shader.source)?;
            written += 1;
        }
    }
    Ok(written)
}

/// Format a report as markdown tables.
pub fn format_markdown(report: &Report) -> String {
    let mut out = String::new();
    out.push_str("| # | Material | Iterator | Passes | Program | Lightmap | Notes |\n");
    out.push_str("|---|----------|----------|--------|---------|----------|-------|\n");
    for row in &report.materials {
        let program = row.program.map_or_else(|| "-".to_string(), |h| h.to_string());
        let mut notes = Vec::new();
        if row.defaulted {
            notes.push("defaulted");
        }
        if !row.explicit {
            notes.push("implicit");
        }
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            row.index,
            row.name,
            row.iterator,
            row.passes,
            program,
            if row.lightmapped { "yes" } else { "no" },
            notes.join(", "),
        ));
    }

    out.push_str("\n| Iterator | Materials |\n|----------|-----------|\n");
    for (iterator, count) in report.iterator_counts() {
        out.push_str(&format!("| {} | {} |\n", iterator, count));
    }

    let p = &report.programs;
    out.push_str(&format!(
        "\n{} programs from {} shader objects ({} shader and {} program requests deduplicated)\n",
        p.programs, p.shaders, p.shader_hits, p.program_hits
    ));

    let f = &report.frame;
    out.push_str("\n| Surfaces | Vertexes | Indexes | Draws | State calls | Uploads | Dlight passes | Fog passes |\n");
    out.push_str("|----------|----------|---------|-------|-------------|---------|---------------|------------|\n");
    out.push_str(&format!(
        "| {} | {} | {} | {} | {} | {} | {} | {} |\n",
        f.surfaces, f.vertices, f.indexes, f.draws, f.state_calls, f.uploads, f.dlight_passes, f.fog_passes
    ));

    if !report.rejected.is_empty() {
        out.push_str(&format!("\nRejected files: {}\n", report.rejected.join(", ")));
    }
    out
}
