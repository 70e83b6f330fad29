//! File adapters around the scoring engine.
//!
//! Inputs are headerless, tab-separated tables. Lines starting with `#` and blank lines
//! are skipped, empty cells are missing values, and files ending in `.gz` are
//! decompressed on the fly. Quote characters carry no meaning. Empty cells past a
//! table's column count, such as a stray trailing tab, are ignored; the first row's
//! trailing empties never count towards that column count. Scores are written as `geneA\tgeneB\tSIREN` rows into a
//! temporary sibling file that is renamed into place once fully flushed.

use crate::types::{EdgeList, ExpressionMatrix, ScoreVector, WeightMatrix};
use ahash::AHashMap;
use flate2::read::MultiGzDecoder;
use ndarray::Array2;
use std::fmt::Write as FmtWrite;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read tab-separated input: {0}")]
    Csv(#[from] csv::Error),

    #[error("'{path}' line {line}, column {column}: cannot parse '{value}' as a number.")]
    Parse {
        path: String,
        line: u64,
        column: usize,
        value: String,
    },

    #[error("'{path}' line {line}: expected {expected} columns, found {found}.")]
    Ragged {
        path: String,
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("'{0}' contains no data rows.")]
    Empty(String),

    #[error("'{path}' line {line}: gene '{gene}' does not appear in the expression file.")]
    UnknownGene {
        path: String,
        line: u64,
        gene: String,
    },

    #[error("'{path}' line {line}: gene index 0 is not valid in a one-based network file.")]
    ZeroIndex { path: String, line: u64 },
}

/// Expression values whose rows are named by a gene identifier column.
#[derive(Debug, Clone)]
pub struct LabelledExpression {
    pub gene_ids: Vec<String>,
    pub index: AHashMap<String, usize>,
    pub matrix: ExpressionMatrix,
}

impl LabelledExpression {
    pub fn lookup(&self, gene: &str) -> Option<usize> {
        self.index.get(gene).copied()
    }
}

// ========================================================================================
//                                   Table reading
// ========================================================================================

fn open_table(path: &Path) -> Result<csv::Reader<Box<dyn Read + Send>>, TableError> {
    let file = File::open(path)?;
    let source: Box<dyn Read + Send> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(MultiGzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .comment(Some(b'#'))
        .from_reader(source))
}

/// Calls `visit` with the line number and fields of every data row.
fn for_each_row<F>(path: &Path, mut visit: F) -> Result<(), TableError>
where
    F: FnMut(u64, &[&str]) -> Result<(), TableError>,
{
    let mut reader = open_table(path)?;
    let mut record = csv::StringRecord::new();
    while reader.read_record(&mut record)? {
        let line = record.position().map_or(0, csv::Position::line);
        if record.iter().all(str::is_empty) {
            continue;
        }
        let fields: Vec<&str> = record.iter().collect();
        visit(line, &fields)?;
    }
    Ok(())
}

/// Drops empty trailing fields beyond the first `keep`.
fn trim_trailing_empty<'a, 'b>(fields: &'b [&'a str], keep: usize) -> &'b [&'a str] {
    let mut end = fields.len();
    while end > keep && fields[end - 1].is_empty() {
        end -= 1;
    }
    &fields[..end]
}

/// Parses one cell. `NaN`, `nan`, `NA` and empty cells are missing values.
pub fn parse_value(token: &str) -> Option<f64> {
    match token.trim() {
        "" | "NA" | "NaN" | "nan" => Some(f64::NAN),
        other => other.parse().ok(),
    }
}

fn parse_cell(path: &Path, line: u64, column: usize, token: &str) -> Result<f64, TableError> {
    parse_value(token).ok_or_else(|| TableError::Parse {
        path: path.display().to_string(),
        line,
        column: column + 1,
        value: token.to_string(),
    })
}

/// Reads a rectangular numeric table. The first row fixes the column count.
pub fn read_numeric_table(path: &Path) -> Result<Array2<f64>, TableError> {
    let mut values = Vec::new();
    let mut columns: Option<usize> = None;
    let mut rows = 0usize;

    for_each_row(path, |line, fields| {
        let fields = trim_trailing_empty(fields, columns.unwrap_or(0));
        let expected = *columns.get_or_insert(fields.len());
        if fields.len() != expected {
            return Err(TableError::Ragged {
                path: path.display().to_string(),
                line,
                expected,
                found: fields.len(),
            });
        }
        for (column, token) in fields.iter().enumerate() {
            values.push(parse_cell(path, line, column, token)?);
        }
        rows += 1;
        Ok(())
    })?;

    let columns = columns.ok_or_else(|| TableError::Empty(path.display().to_string()))?;
    Ok(Array2::from_shape_vec((rows, columns), values)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?)
}

pub fn load_expression_matrix(path: &Path) -> Result<ExpressionMatrix, TableError> {
    let matrix = ExpressionMatrix::new(read_numeric_table(path)?);
    log::info!(
        "Loaded {} genes × {} conditions from '{}'",
        matrix.num_genes(),
        matrix.num_conditions(),
        path.display()
    );
    Ok(matrix)
}

pub fn load_weight_matrix(path: &Path) -> Result<WeightMatrix, TableError> {
    Ok(WeightMatrix::new(read_numeric_table(path)?))
}

/// Reads an expression file whose first column names the gene.
///
/// Genes are indexed in order of first appearance. A repeated identifier replaces the
/// values of its earlier row. Rows with fewer than two fields are skipped.
pub fn load_labelled_expression(path: &Path) -> Result<LabelledExpression, TableError> {
    let mut gene_ids: Vec<String> = Vec::new();
    let mut index: AHashMap<String, usize> = AHashMap::new();
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut columns: Option<usize> = None;

    for_each_row(path, |line, fields| {
        let fields = trim_trailing_empty(fields, columns.map_or(0, |c| c + 1));
        if fields.len() < 2 {
            return Ok(());
        }
        let expected = *columns.get_or_insert(fields.len() - 1);
        let found = fields.len() - 1;
        if found != expected {
            return Err(TableError::Ragged {
                path: path.display().to_string(),
                line,
                expected,
                found,
            });
        }

        let values = fields[1..]
            .iter()
            .enumerate()
            .map(|(column, token)| parse_cell(path, line, column + 1, token))
            .collect::<Result<Vec<f64>, _>>()?;

        let gene = fields[0];
        match index.get(gene) {
            Some(&row) => {
                log::warn!(
                    "Gene '{gene}' appears again on line {line} of '{}'; using the later values",
                    path.display()
                );
                rows[row] = values;
            }
            None => {
                index.insert(gene.to_string(), gene_ids.len());
                gene_ids.push(gene.to_string());
                rows.push(values);
            }
        }
        Ok(())
    })?;

    if rows.is_empty() {
        return Err(TableError::Empty(path.display().to_string()));
    }
    let matrix = ExpressionMatrix::from_rows(rows)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    log::info!(
        "Loaded {} named genes × {} conditions from '{}'",
        matrix.num_genes(),
        matrix.num_conditions(),
        path.display()
    );
    Ok(LabelledExpression {
        gene_ids,
        index,
        matrix,
    })
}

/// Reads a network of gene indices from the first two columns of each row.
pub fn load_edge_list(path: &Path, one_based: bool) -> Result<EdgeList, TableError> {
    let mut edges = Vec::new();
    for_each_row(path, |line, fields| {
        if fields.len() < 2 {
            return Err(TableError::Ragged {
                path: path.display().to_string(),
                line,
                expected: 2,
                found: fields.len(),
            });
        }
        let a = parse_index(path, line, 0, fields[0], one_based)?;
        let b = parse_index(path, line, 1, fields[1], one_based)?;
        edges.push((a, b));
        Ok(())
    })?;
    log::info!("Loaded {} edges from '{}'", edges.len(), path.display());
    Ok(EdgeList::new(edges))
}

fn parse_index(
    path: &Path,
    line: u64,
    column: usize,
    token: &str,
    one_based: bool,
) -> Result<usize, TableError> {
    // Numeric network files may carry indices written as floats ("3.0").
    let raw = match token.trim().parse::<usize>() {
        Ok(index) => Some(index),
        Err(_) => token
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0 && v.fract() == 0.0)
            .map(|v| v as usize),
    };
    let raw = raw.ok_or_else(|| TableError::Parse {
        path: path.display().to_string(),
        line,
        column: column + 1,
        value: token.to_string(),
    })?;

    if !one_based {
        return Ok(raw);
    }
    raw.checked_sub(1).ok_or_else(|| TableError::ZeroIndex {
        path: path.display().to_string(),
        line,
    })
}

/// Reads a network whose first two columns name genes of `expression`.
pub fn load_named_edge_list(
    path: &Path,
    expression: &LabelledExpression,
) -> Result<EdgeList, TableError> {
    let mut edges = Vec::new();
    for_each_row(path, |line, fields| {
        if fields.len() < 2 {
            return Err(TableError::Ragged {
                path: path.display().to_string(),
                line,
                expected: 2,
                found: fields.len(),
            });
        }
        let resolve = |gene: &str| {
            expression.lookup(gene).ok_or_else(|| TableError::UnknownGene {
                path: path.display().to_string(),
                line,
                gene: gene.to_string(),
            })
        };
        edges.push((resolve(fields[0])?, resolve(fields[1])?));
        Ok(())
    })?;
    log::info!("Loaded {} named edges from '{}'", edges.len(), path.display());
    Ok(EdgeList::new(edges))
}

/// Reads expected scores from a result file: the fourth field of every row with exactly
/// four fields. Other rows are ignored.
pub fn load_reference_scores(path: &Path) -> Result<Vec<f64>, TableError> {
    let mut scores = Vec::new();
    for_each_row(path, |line, fields| {
        if trim_trailing_empty(fields, 4).len() == 4 {
            scores.push(parse_cell(path, line, 3, fields[3])?);
        }
        Ok(())
    })?;
    Ok(scores)
}

// ========================================================================================
//                                   Score writing
// ========================================================================================

/// Gene labels used for the first two output columns.
pub enum GeneLabels<'a> {
    /// Indices as written, offset by one when the network was one-based.
    Indices { one_based: bool },
    Names(&'a [String]),
}

impl GeneLabels<'_> {
    fn write_label(&self, out: &mut String, gene: usize) {
        match self {
            Self::Indices { one_based } => {
                let shown = if *one_based { gene + 1 } else { gene };
                let _ = write!(out, "{shown}");
            }
            Self::Names(names) => match names.get(gene) {
                Some(name) => out.push_str(name),
                None => {
                    let _ = write!(out, "{gene}");
                }
            },
        }
    }
}

/// Writes one `geneA\tgeneB\tSIREN` row per edge, in edge order.
pub fn write_scores<W: Write>(
    writer: &mut W,
    edges: &EdgeList,
    scores: &ScoreVector,
    labels: &GeneLabels<'_>,
) -> io::Result<()> {
    if edges.len() != scores.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{} edges but {} scores; refusing to write a misaligned table.",
                edges.len(),
                scores.len()
            ),
        ));
    }

    writeln!(writer, "#A\tB\tSIREN")?;
    let mut line = String::with_capacity(64);
    let mut ryu_buffer = ryu::Buffer::new();
    for (&(a, b), &score) in edges.iter().zip(scores.iter()) {
        line.clear();
        labels.write_label(&mut line, a);
        line.push('\t');
        labels.write_label(&mut line, b);
        line.push('\t');
        line.push_str(ryu_buffer.format(score));
        writeln!(writer, "{line}")?;
    }
    Ok(())
}

/// Writes the score table to `path` through a temporary file in the same directory.
pub fn write_scores_file(
    path: &Path,
    edges: &EdgeList,
    scores: &ScoreVector,
    labels: &GeneLabels<'_>,
) -> io::Result<()> {
    let (temp_path, temp_file) = create_sibling_temp_file(path)?;
    let write_result = (|| -> io::Result<()> {
        let mut writer = BufWriter::new(temp_file);
        write_scores(&mut writer, edges, scores, labels)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(io::Error::other)?;
        file.sync_all()
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }
    fs::rename(&temp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&temp_path);
    })
}

fn create_sibling_temp_file(path: &Path) -> io::Result<(PathBuf, File)> {
    let output_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let output_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Output path '{}' has no file name.", path.display()),
        )
    })?;

    let pid = std::process::id();
    for attempt in 0..32u32 {
        let candidate = output_dir.join(format!(
            ".{}.{pid}.{attempt}.tmp",
            output_name.to_string_lossy()
        ));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!(
            "Failed to allocate a unique temporary output file in '{}'.",
            output_dir.display()
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use ndarray::array;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn numeric_table_reads_missing_markers() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "expr.txt", "1\t2\tNaN\n# note\n\n4\tNA\t6\n");
        let table = read_numeric_table(&path).unwrap();
        assert_eq!(table.dim(), (2, 3));
        assert_eq!(table[[0, 1]], 2.0);
        assert!(table[[0, 2]].is_nan());
        assert!(table[[1, 1]].is_nan());
        assert_eq!(table[[1, 2]], 6.0);
    }

    #[test]
    fn numeric_table_rejects_ragged_rows() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "expr.txt", "1\t2\t3\n4\t5\n");
        match read_numeric_table(&path).unwrap_err() {
            TableError::Ragged {
                line,
                expected,
                found,
                ..
            } => assert_eq!((line, expected, found), (2, 3, 2)),
            other => panic!("Expected Ragged, got {other:?}"),
        }
    }

    #[test]
    fn numeric_table_drops_trailing_empty_fields() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "expr.txt", "1\t2\t\n3\t4\n");
        assert_eq!(read_numeric_table(&path).unwrap(), array![[1.0, 2.0], [3.0, 4.0]]);
    }

    #[test]
    fn empty_last_cell_is_a_missing_value() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "expr.txt", "1\t2\t3\n4\t5\t\n7\t8\t\t\n");
        let table = read_numeric_table(&path).unwrap();
        assert_eq!(table.dim(), (3, 3));
        assert_eq!(table[[1, 1]], 5.0);
        assert!(table[[1, 2]].is_nan());
        assert!(table[[2, 2]].is_nan());
    }

    #[test]
    fn labelled_expression_keeps_an_empty_last_condition() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "expr.txt", "g1\t1\t2\t3\ng2\t4\t5\t\n");
        let labelled = load_labelled_expression(&path).unwrap();
        assert_eq!(labelled.matrix.num_conditions(), 3);
        let g2 = labelled.matrix.gene(1);
        assert_eq!(g2[0], 4.0);
        assert!(g2[2].is_nan());
    }

    #[test]
    fn quote_characters_are_plain_text() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "expr.txt", "\"a\t1\t2\nb\"\t3\t4\n");
        let labelled = load_labelled_expression(&path).unwrap();
        assert_eq!(labelled.gene_ids, vec!["\"a", "b\""]);
        assert_eq!(labelled.matrix.gene(1), array![3.0, 4.0]);
    }

    #[test]
    fn numeric_table_reports_unparseable_cells() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "expr.txt", "1\t2\n3\tabc\n");
        match read_numeric_table(&path).unwrap_err() {
            TableError::Parse {
                line,
                column,
                value,
                ..
            } => {
                assert_eq!((line, column), (2, 2));
                assert_eq!(value, "abc");
            }
            other => panic!("Expected Parse, got {other:?}"),
        }
    }

    #[test]
    fn empty_table_is_an_error() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "expr.txt", "# only a comment\n");
        assert!(matches!(read_numeric_table(&path), Err(TableError::Empty(_))));
    }

    #[test]
    fn gzipped_tables_are_decompressed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("weights.txt.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"1\t0.5\n0.5\t1\n").unwrap();
        encoder.finish().unwrap();

        let weights = load_weight_matrix(&path).unwrap();
        assert_eq!(weights.into_inner(), array![[1.0, 0.5], [0.5, 1.0]]);
    }

    #[test]
    fn one_based_network_is_shifted_to_zero_based() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "net.txt", "1\t2\n3\t1\textra\n");
        let edges = load_edge_list(&path, true).unwrap();
        assert_eq!(edges.into_inner(), vec![(0, 1), (2, 0)]);

        let zero_based = load_edge_list(&path, false).unwrap();
        assert_eq!(zero_based.into_inner(), vec![(1, 2), (3, 1)]);
    }

    #[test]
    fn zero_in_one_based_network_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "net.txt", "1\t2\n0\t1\n");
        assert!(matches!(
            load_edge_list(&path, true),
            Err(TableError::ZeroIndex { line: 2, .. })
        ));
    }

    #[test]
    fn float_formatted_indices_are_accepted() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "net.txt", "1.0\t4.0\n");
        assert_eq!(load_edge_list(&path, true).unwrap().into_inner(), vec![(0, 3)]);
    }

    #[test]
    fn labelled_expression_indexes_genes_by_first_appearance() {
        let dir = tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "expr.txt",
            "YAL001\t1\t2\t3\nYAL002\t4\t5\t6\nlonely\nYAL001\t7\t8\t9\n",
        );
        let labelled = load_labelled_expression(&path).unwrap();
        assert_eq!(labelled.gene_ids, vec!["YAL001", "YAL002"]);
        assert_eq!(labelled.lookup("YAL002"), Some(1));
        assert_eq!(labelled.matrix.gene(0), array![7.0, 8.0, 9.0]);

        let net = write_file(dir.path(), "net.txt", "YAL002\tYAL001\n");
        let edges = load_named_edge_list(&net, &labelled).unwrap();
        assert_eq!(edges.into_inner(), vec![(1, 0)]);
    }

    #[test]
    fn unknown_gene_in_named_network_is_rejected() {
        let dir = tempdir().unwrap();
        let expr = write_file(dir.path(), "expr.txt", "g1\t1\t2\ng2\t3\t4\n");
        let labelled = load_labelled_expression(&expr).unwrap();
        let net = write_file(dir.path(), "net.txt", "g1\tg2\ng2\tg9\n");
        match load_named_edge_list(&net, &labelled).unwrap_err() {
            TableError::UnknownGene { line, gene, .. } => {
                assert_eq!(line, 2);
                assert_eq!(gene, "g9");
            }
            other => panic!("Expected UnknownGene, got {other:?}"),
        }
    }

    #[test]
    fn reference_scores_come_from_four_field_rows() {
        let dir = tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "Result.txt",
            "A\tB\tSIREN\n1\t2\tx\t0.25\n3\t4\n5\t6\ty\t1.5e-3\n",
        );
        assert_eq!(load_reference_scores(&path).unwrap(), vec![0.25, 1.5e-3]);
    }

    #[test]
    fn score_rows_are_tab_separated_with_header() {
        let edges = EdgeList::new(vec![(0, 1), (2, 0)]);
        let scores = ScoreVector(array![0.5, 0.125]);
        let mut out = Vec::new();
        write_scores(&mut out, &edges, &scores, &GeneLabels::Indices { one_based: true }).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "#A\tB\tSIREN\n1\t2\t0.5\n3\t1\t0.125\n"
        );

        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut out = Vec::new();
        write_scores(&mut out, &edges, &scores, &GeneLabels::Names(&names)).unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with("c\ta\t0.125\n"));
    }

    #[test]
    fn misaligned_scores_are_refused() {
        let edges = EdgeList::new(vec![(0, 1)]);
        let scores = ScoreVector(array![0.5, 0.25]);
        let mut out = Vec::new();
        assert!(write_scores(&mut out, &edges, &scores, &GeneLabels::Indices { one_based: false }).is_err());
    }

    #[test]
    fn score_file_round_trips_through_reference_loader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scores.tsv");
        let edges = EdgeList::new(vec![(0, 1), (1, 2)]);
        let scores = ScoreVector(array![0.1, 0.30000000000000004]);
        write_scores_file(&path, &edges, &scores, &GeneLabels::Indices { one_based: true })
            .unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let table = read_numeric_table(&path).unwrap();
        assert_eq!(table.column(2).to_vec(), vec![0.1, 0.30000000000000004]);
    }
}
