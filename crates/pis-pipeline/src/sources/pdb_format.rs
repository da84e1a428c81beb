//! Legacy PDB coordinate format
//!
//! Only the records the pipeline needs are read:
//!
//! | Record | Columns | Used for |
//! |---|---|---|
//! | `TITLE` | 11-80 (continued) | structure title |
//! | `EXPDTA` | 11-79 | experimental method |
//! | `REMARK   2` | `RESOLUTION. x.xx ANGSTROMS.` | resolution |
//! | `MODEL` / `ENDMDL` | 11-14 | model number |
//! | `ATOM` / `HETATM` | 13-16 name, 17 altLoc, 18-20 residue, 22 chain, 23-27 residue id, 31-54 xyz | C-alpha trace |
//!
//! Files without `MODEL` records are a single model numbered 1. The first
//! alternate location of each C-alpha wins; HETATM records are kept only for
//! modified amino acids with a known parent residue.

use std::collections::HashSet;

use super::{PdbChain, PdbEntry, PdbModel};
use crate::error::{PipelineError, Result};

/// Map a three-letter residue name to its one-letter code.
///
/// Common modified residues map to their parent amino acid.
pub fn three_to_one(residue: &str) -> Option<char> {
    let code = match residue {
        "ALA" => 'A',
        "ARG" => 'R',
        "ASN" => 'N',
        "ASP" => 'D',
        "CYS" => 'C',
        "GLN" => 'Q',
        "GLU" => 'E',
        "GLY" => 'G',
        "HIS" => 'H',
        "ILE" => 'I',
        "LEU" => 'L',
        "LYS" => 'K',
        "MET" => 'M',
        "PHE" => 'F',
        "PRO" => 'P',
        "SER" => 'S',
        "THR" => 'T',
        "TRP" => 'W',
        "TYR" => 'Y',
        "VAL" => 'V',
        "SEC" => 'U',
        "PYL" => 'O',
        "MSE" => 'M',
        "HYP" => 'P',
        "SEP" => 'S',
        "TPO" => 'T',
        "PTR" => 'Y',
        "CSO" => 'C',
        "MLY" => 'K',
        _ => return None,
    };
    Some(code)
}

fn field(line: &str, start: usize, end: usize) -> &str {
    let end = end.min(line.len());
    line.get(start.min(end)..end).unwrap_or("").trim()
}

fn parse_coord(line: &str, start: usize, end: usize, pdb_id: &str, line_no: usize) -> Result<f32> {
    field(line, start, end).parse::<f32>().map_err(|_| {
        PipelineError::malformed(
            pdb_id,
            format!("line {}: unparsable coordinate '{}'", line_no, field(line, start, end)),
        )
    })
}

#[derive(Default)]
struct ModelBuilder {
    number: i32,
    chains: Vec<PdbChain>,
    seen: HashSet<(String, String)>,
}

impl ModelBuilder {
    fn new(number: i32) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }

    fn push(&mut self, chain: &str, residue_id: &str, residue: char, xyz: [f32; 3]) {
        if !self.seen.insert((chain.to_string(), residue_id.to_string())) {
            return;
        }
        let idx = match self.chains.iter().position(|c| c.label == chain) {
            Some(idx) => idx,
            None => {
                self.chains.push(PdbChain {
                    label: chain.to_string(),
                    residues: String::new(),
                    ca_trace: Vec::new(),
                });
                self.chains.len() - 1
            }
        };
        self.chains[idx].residues.push(residue);
        self.chains[idx].ca_trace.push(xyz);
    }

    fn finish(self) -> PdbModel {
        PdbModel {
            number: self.number,
            chains: self.chains,
        }
    }
}

/// Parse a PDB-format file into a [`PdbEntry`]
pub fn parse_pdb(pdb_id: &str, text: &str) -> Result<PdbEntry> {
    let pdb_id = pdb_id.trim().to_ascii_uppercase();
    let mut title_parts: Vec<String> = Vec::new();
    let mut method: Option<String> = None;
    let mut resolution: Option<f64> = None;
    let mut models: Vec<PdbModel> = Vec::new();
    let mut current: Option<ModelBuilder> = None;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let record = field(line, 0, 6);

        match record {
            "TITLE" => {
                let part = field(line, 10, 80);
                if !part.is_empty() {
                    title_parts.push(part.to_string());
                }
            }
            "EXPDTA" => {
                let value = field(line, 10, 79);
                if !value.is_empty() {
                    method = Some(value.to_string());
                }
            }
            "REMARK" if field(line, 6, 10) == "2" => {
                if let Some(rest) = line.split("RESOLUTION.").nth(1) {
                    resolution = rest
                        .split_whitespace()
                        .next()
                        .and_then(|v| v.parse::<f64>().ok());
                }
            }
            "MODEL" => {
                if let Some(done) = current.take() {
                    models.push(done.finish());
                }
                let number = field(line, 10, 14)
                    .parse::<i32>()
                    .unwrap_or(models.len() as i32 + 1);
                current = Some(ModelBuilder::new(number));
            }
            "ENDMDL" => {
                if let Some(done) = current.take() {
                    models.push(done.finish());
                }
            }
            "ATOM" | "HETATM" => {
                if line.get(12..16) != Some(" CA ") {
                    continue;
                }
                let alt_loc = field(line, 16, 17);
                if !alt_loc.is_empty() && alt_loc != "A" {
                    continue;
                }
                let residue_name = field(line, 17, 20);
                let residue = match (three_to_one(residue_name), record) {
                    (Some(code), _) => code,
                    (None, "ATOM") => 'X',
                    (None, _) => continue,
                };
                let chain = field(line, 21, 22);
                let chain = if chain.is_empty() { "A" } else { chain };
                let residue_id = field(line, 22, 27);

                let xyz = [
                    parse_coord(line, 30, 38, &pdb_id, line_no)?,
                    parse_coord(line, 38, 46, &pdb_id, line_no)?,
                    parse_coord(line, 46, 54, &pdb_id, line_no)?,
                ];

                current
                    .get_or_insert_with(|| ModelBuilder::new(models.len() as i32 + 1))
                    .push(chain, residue_id, residue, xyz);
            }
            _ => {}
        }
    }

    if let Some(done) = current.take() {
        models.push(done.finish());
    }
    models.retain(|m| !m.chains.is_empty());

    Ok(PdbEntry {
        id: pdb_id,
        title: (!title_parts.is_empty()).then(|| title_parts.join(" ")),
        method,
        resolution,
        models,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE_MODEL: &str = "\
HEADER    TRANSFERASE                             01-JAN-00   1ABC
TITLE     CRYSTAL STRUCTURE OF A TEST
TITLE    2 PROTEIN
EXPDTA    X-RAY DIFFRACTION
REMARK   2 RESOLUTION.    1.80 ANGSTROMS.
ATOM      1  N   MET A   1      11.104   6.134  -6.504  1.00  0.00           N
ATOM      2  CA  MET A   1      11.639   6.071  -5.147  1.00  0.00           C
ATOM      3  CA ALYS A   2      12.000   7.000  -4.000  0.50  0.00           C
ATOM      4  CA BLYS A   2      12.500   7.500  -4.500  0.50  0.00           C
ATOM      5  CA  GLY B   1       1.000   2.000   3.000  1.00  0.00           C
HETATM    6  CA  MSE B   2       2.000   3.000   4.000  1.00  0.00           C
HETATM    7 CA    CA B 101       5.000   5.000   5.000  1.00  0.00          CA
HETATM    8  O   HOH B 201       9.000   9.000   9.000  1.00  0.00           O
END
";

    const NMR: &str = "\
EXPDTA    SOLUTION NMR
MODEL        1
ATOM      1  CA  ALA A   1       1.000   1.000   1.000  1.00  0.00           C
ATOM      2  CA  CYS A   2       2.000   2.000   2.000  1.00  0.00           C
ENDMDL
MODEL        2
ATOM      1  CA  ALA A   1       1.100   1.100   1.100  1.00  0.00           C
ATOM      2  CA  CYS A   2       2.100   2.100   2.100  1.00  0.00           C
ENDMDL
END
";

    #[test]
    fn test_parse_single_model() {
        let entry = parse_pdb("1abc", SINGLE_MODEL).unwrap();
        assert_eq!(entry.id, "1ABC");
        assert_eq!(entry.title.as_deref(), Some("CRYSTAL STRUCTURE OF A TEST PROTEIN"));
        assert_eq!(entry.method.as_deref(), Some("X-RAY DIFFRACTION"));
        assert_eq!(entry.resolution, Some(1.8));
        assert_eq!(entry.models.len(), 1);

        let model = &entry.models[0];
        assert_eq!(model.number, 1);
        assert_eq!(model.chains.len(), 2);
        assert_eq!(model.chains[0].label, "A");
        assert_eq!(model.chains[0].residues, "MK");
        assert_eq!(model.chains[0].ca_trace[1], [12.0, 7.0, -4.0]);
        assert_eq!(model.chains[1].residues, "GM");
    }

    #[test]
    fn test_parse_multi_model() {
        let entry = parse_pdb("2ABC", NMR).unwrap();
        assert_eq!(entry.method.as_deref(), Some("SOLUTION NMR"));
        assert_eq!(entry.resolution, None);
        assert_eq!(entry.models.iter().map(|m| m.number).collect::<Vec<_>>(), vec![1, 2]);
        assert!(entry.models.iter().all(|m| m.chains[0].residues == "AC"));
    }

    #[test]
    fn test_bad_coordinates_are_malformed() {
        let text = "ATOM      2  CA  MET A   1      11.639   abcde  -5.147  1.00  0.00           C\n";
        assert!(matches!(
            parse_pdb("3ABC", text),
            Err(PipelineError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_no_coordinates_yields_no_models() {
        let entry = parse_pdb("4ABC", "HEADER    EMPTY\nEND\n").unwrap();
        assert!(entry.models.is_empty());
    }

    #[test]
    fn test_three_to_one() {
        assert_eq!(three_to_one("TRP"), Some('W'));
        assert_eq!(three_to_one("MSE"), Some('M'));
        assert_eq!(three_to_one("HOH"), None);
    }
}
