use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::layout::TAXONOMY_HEADER;
use crate::pipeline::{Artifact, ArtifactRole, PipelineContext, Stage, ToolHost};

const EXPORTED_TABLE: &str = "feature-table.biom";
const EXPORTED_TREE: &str = "tree.nwk";
const EXPORTED_SEQUENCES: &str = "dna-sequences.fasta";
const EXPORTED_TAXONOMY: &str = "taxonomy.tsv";
const ANNOTATION_TABLE: &str = "biom-taxonomy.tsv";
const MERGED_TABLE: &str = "table-with-taxonomy.biom";
const MERGED_TABLE_TEXT: &str = "table-with-taxonomy.tsv";

pub struct ExportResults;

impl Stage for ExportResults {
    fn name(&self) -> &'static str {
        "export"
    }

    fn requires(&self) -> &'static [ArtifactRole] {
        &[
            ArtifactRole::FeatureTable,
            ArtifactRole::RootedTree,
            ArtifactRole::RepresentativeSequences,
            ArtifactRole::Taxonomy,
        ]
    }

    fn run(&self, ctx: &PipelineContext, tools: &mut ToolHost<'_>) -> PipelineResult<Vec<Artifact>> {
        let layout = &ctx.layout;
        let export_dir = layout.export_dir();
        let exports = [
            (ArtifactRole::FeatureTable, ArtifactRole::ExportedTable, EXPORTED_TABLE),
            (ArtifactRole::RootedTree, ArtifactRole::ExportedTree, EXPORTED_TREE),
            (
                ArtifactRole::RepresentativeSequences,
                ArtifactRole::ExportedSequences,
                EXPORTED_SEQUENCES,
            ),
            (ArtifactRole::Taxonomy, ArtifactRole::ExportedTaxonomy, EXPORTED_TAXONOMY),
        ];

        let mut produced = Vec::with_capacity(exports.len() + 3);
        for (source, role, file) in exports {
            let input = ctx.require(self.name(), source)?;
            let output = layout.export_file(file);
            tools.invoke(
                ctx.toolkit()
                    .args(["tools", "export"])
                    .path("--input-path", input)
                    .path("--output-path", &export_dir)
                    .produces(&output),
            )?;
            produced.push(Artifact::new(role, output, self.name()));
        }

        let annotations = layout.export_file(ANNOTATION_TABLE);
        rewrite_taxonomy_header(&layout.export_file(EXPORTED_TAXONOMY), &annotations)?;
        produced.push(Artifact::new(
            ArtifactRole::AnnotationTable,
            annotations.clone(),
            self.name(),
        ));

        let merged = layout.export_file(MERGED_TABLE);
        tools.invoke(
            ctx.biom()
                .arg("add-metadata")
                .path("-i", &layout.export_file(EXPORTED_TABLE))
                .output("-o", &merged)
                .path("--observation-metadata-fp", &annotations)
                .param("--observation-header", "OTUID,taxonomy,confidence")
                .param("--sc-separated", "taxonomy"),
        )?;
        produced.push(Artifact::new(ArtifactRole::MergedTable, merged.clone(), self.name()));

        let merged_text = layout.export_file(MERGED_TABLE_TEXT);
        tools.invoke(
            ctx.biom()
                .arg("convert")
                .path("-i", &merged)
                .output("-o", &merged_text)
                .arg("--to-tsv")
                .param("--header-key", "taxonomy"),
        )?;
        produced.push(Artifact::new(
            ArtifactRole::MergedTableText,
            merged_text,
            self.name(),
        ));

        Ok(produced)
    }
}

/// Copies an exported taxonomy table to `dst`, replacing its first line with
/// the column header the BIOM tooling expects. An empty source still yields
/// a header-only file.
pub fn rewrite_taxonomy_header(src: &Path, dst: &Path) -> PipelineResult<()> {
    let reader = BufReader::new(File::open(src).map_err(|err| PipelineError::io(src, err))?);
    let mut writer = BufWriter::new(File::create(dst).map_err(|err| PipelineError::io(dst, err))?);

    writeln!(writer, "{TAXONOMY_HEADER}").map_err(|err| PipelineError::io(dst, err))?;
    let mut lines = reader.lines();
    match lines.next() {
        Some(Ok(first)) if !first.starts_with("Feature ID") => {
            warn!(path = %src.display(), header = %first, "Unexpected taxonomy header replaced");
        }
        Some(Err(err)) => return Err(PipelineError::io(src, err)),
        _ => {}
    }
    let mut rows = 0usize;
    for line in lines {
        let line = line.map_err(|err| PipelineError::io(src, err))?;
        writeln!(writer, "{line}").map_err(|err| PipelineError::io(dst, err))?;
        rows += 1;
    }
    writer.flush().map_err(|err| PipelineError::io(dst, err))?;
    debug!(rows, path = %dst.display(), "Taxonomy annotation table written");
    Ok(())
}
