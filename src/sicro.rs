//! SICRO analytic report parser.
//!
//! The analytic report is a dense print layout, not a table: each
//! composition opens with a 7-digit code row, followed by a metadata
//! block (crew production rate), then EQUIPAMENTOS / MÃO DE OBRA /
//! MATERIAL sections, closed by a CUSTO TOTAL row. The scanner is an
//! explicit state machine with a pure transition function so every
//! transition is testable against synthetic row sequences; the driver
//! only folds effects into a parse tree.
//!
//! Completeness gate: a composition whose block yielded crew rows but
//! zero material rows poisons the whole import. A priced crew without a
//! cost base is meaningless downstream, so the import is rejected
//! rather than half-recorded.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

use crate::classify::fold_text;
use crate::models::ItemKind;
use crate::workbook::Cell;

static COMPOSITION_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{7}$").unwrap());

/// Scanner state. `SearchComposition` is the initial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    SearchComposition,
    Metadata,
    Equipment,
    Labor,
    Material,
}

/// Side effects a transition asks the driver to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// A known composition code opened a new block.
    Enter { code: String },
    /// A 7-digit row that matched no cached item; the current block, if
    /// any, is abandoned.
    Abandon,
    /// Crew production rate from the metadata block.
    Production { rate: Decimal, unit: String },
    /// A crew row (equipment or labor section).
    TeamMember {
        code: String,
        description: String,
        unit: String,
        quantity: Decimal,
        kind: ItemKind,
    },
    /// A material row; materials feed the ingredient graph.
    Ingredient {
        code: String,
        description: String,
        unit: String,
        coefficient: Decimal,
    },
    /// CUSTO TOTAL closed the block.
    Close,
}

/// Strips leading zeros so report codes and catalog codes compare
/// equal regardless of padding.
pub fn normalize_code(code: &str) -> String {
    let trimmed = code.trim().trim_start_matches('0');
    trimmed.to_string()
}

fn col(row: &[String], idx: usize) -> &str {
    row.get(idx).map(|s| s.trim()).unwrap_or("")
}

fn parse_report_decimal(text: &str) -> Option<Decimal> {
    text.trim().replace(',', ".").parse::<Decimal>().ok()
}

/// Pure transition function: `(state, row) → (state, effects)`.
///
/// `known` answers whether a normalized code matches a cached catalog
/// item; only known codes open composition blocks.
pub fn step(
    state: ScanState,
    row: &[String],
    known: &dyn Fn(&str) -> bool,
) -> (ScanState, Vec<Effect>) {
    let val0 = col(row, 0);
    let val1 = col(row, 1);
    let row_str = fold_text(
        &row.iter()
            .map(|s| s.as_str())
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" "),
    );

    // A composition header interrupts any state except the metadata
    // block (where the code row itself was just consumed).
    if state != ScanState::Metadata && COMPOSITION_CODE_RE.is_match(val0) && val1.chars().count() > 5
    {
        return if known(&normalize_code(val0)) {
            (
                ScanState::Metadata,
                vec![Effect::Enter {
                    code: val0.to_string(),
                }],
            )
        } else {
            (ScanState::SearchComposition, vec![Effect::Abandon])
        };
    }

    if state == ScanState::SearchComposition {
        return (state, Vec::new());
    }

    // Section markers and block close apply from metadata onwards.
    if row_str.contains(" - EQUIPAMENTOS") {
        return (ScanState::Equipment, Vec::new());
    }
    if row_str.contains(" - MAO DE OBRA") {
        return (ScanState::Labor, Vec::new());
    }
    if row_str.contains(" - MATERIAL") {
        return (ScanState::Material, Vec::new());
    }
    if row_str.contains("CUSTO TOTAL") {
        return (ScanState::SearchComposition, vec![Effect::Close]);
    }

    match state {
        ScanState::Metadata => {
            if row_str.contains("PRODUCAO DA EQUIP") {
                // The rate floats between columns 6-8 across report
                // vintages; the unit sits in whichever neighbor the
                // rate did not use.
                let c6 = col(row, 6);
                let c7 = col(row, 7);
                let c8 = col(row, 8);
                let rate_text = if !c7.is_empty() {
                    c7
                } else if !c6.is_empty() {
                    c6
                } else {
                    c8
                };
                if let Some(rate) = parse_report_decimal(rate_text) {
                    let unit = if rate_text == c7 { c8 } else { c7 };
                    let unit = if unit.is_empty() { "UN" } else { unit };
                    return (
                        state,
                        vec![Effect::Production {
                            rate,
                            unit: unit.to_string(),
                        }],
                    );
                }
            }
            (state, Vec::new())
        }
        ScanState::Equipment | ScanState::Labor | ScanState::Material => {
            if val0.is_empty() {
                return (state, Vec::new());
            }
            let description = val1.to_string();
            if description.is_empty() {
                return (state, Vec::new());
            }
            let Some(quantity) = parse_report_decimal(col(row, 2)) else {
                return (state, Vec::new());
            };
            let unit = {
                let u = col(row, 3);
                if u.is_empty() { "UN" } else { u }.to_string()
            };
            let effect = match state {
                ScanState::Material => Effect::Ingredient {
                    code: val0.to_string(),
                    description,
                    unit,
                    coefficient: quantity,
                },
                other => Effect::TeamMember {
                    code: val0.to_string(),
                    description,
                    unit,
                    quantity,
                    kind: if other == ScanState::Equipment {
                        ItemKind::Equipment
                    } else {
                        ItemKind::Labor
                    },
                },
            };
            (state, vec![effect])
        }
        ScanState::SearchComposition => unreachable!("handled above"),
    }
}

/// A crew or material row of a parsed composition block.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMember {
    pub code: String,
    pub description: String,
    pub unit: String,
    pub quantity: Decimal,
    pub kind: ItemKind,
}

/// One reconstructed composition block.
#[derive(Debug, Clone, Default)]
pub struct ParsedComposition {
    pub code: String,
    pub production: Option<(Decimal, String)>,
    pub team: Vec<ParsedMember>,
    pub materials: Vec<ParsedMember>,
}

/// Full parse of an analytic report.
#[derive(Debug, Clone, Default)]
pub struct SicroParse {
    pub compositions: Vec<ParsedComposition>,
}

impl SicroParse {
    /// Codes of compositions that entered their block but produced no
    /// material rows; non-empty means the import must be rejected.
    pub fn incomplete_codes(&self) -> Vec<&str> {
        self.compositions
            .iter()
            .filter(|c| c.materials.is_empty())
            .map(|c| c.code.as_str())
            .collect()
    }
}

/// Drives the transition function over a whole sheet, folding effects
/// into composition blocks. A repeated composition code replaces its
/// earlier block (idempotent re-runs of the same report section), and
/// duplicate member rows within one block are dropped, not errored.
pub fn scan_report(rows: &[Vec<Cell>], known: &dyn Fn(&str) -> bool) -> SicroParse {
    let mut state = ScanState::SearchComposition;
    let mut parse = SicroParse::default();
    let mut current: Option<ParsedComposition> = None;
    let mut members_seen: HashSet<String> = HashSet::new();

    let finish = |current: &mut Option<ParsedComposition>, parse: &mut SicroParse| {
        if let Some(done) = current.take() {
            parse
                .compositions
                .retain(|c| normalize_code(&c.code) != normalize_code(&done.code));
            parse.compositions.push(done);
        }
    };

    for row in rows {
        let texts: Vec<String> = row.iter().map(|c| c.text().to_string()).collect();
        let (next, effects) = step(state, &texts, known);
        state = next;

        for effect in effects {
            match effect {
                Effect::Enter { code } => {
                    finish(&mut current, &mut parse);
                    members_seen.clear();
                    current = Some(ParsedComposition {
                        code,
                        ..Default::default()
                    });
                }
                Effect::Abandon => {
                    finish(&mut current, &mut parse);
                    members_seen.clear();
                }
                Effect::Close => {
                    finish(&mut current, &mut parse);
                    members_seen.clear();
                }
                Effect::Production { rate, unit } => {
                    if let Some(comp) = current.as_mut() {
                        if comp.production.is_none() {
                            comp.production = Some((rate, unit));
                        }
                    }
                }
                Effect::TeamMember {
                    code,
                    description,
                    unit,
                    quantity,
                    kind,
                } => {
                    if let Some(comp) = current.as_mut() {
                        if members_seen.insert(normalize_code(&code)) {
                            comp.team.push(ParsedMember {
                                code,
                                description,
                                unit,
                                quantity,
                                kind,
                            });
                        }
                    }
                }
                Effect::Ingredient {
                    code,
                    description,
                    unit,
                    coefficient,
                } => {
                    if let Some(comp) = current.as_mut() {
                        if members_seen.insert(normalize_code(&code)) {
                            comp.materials.push(ParsedMember {
                                code,
                                description,
                                unit,
                                quantity: coefficient,
                                kind: ItemKind::Material,
                            });
                        }
                    }
                }
            }
        }
    }

    // Report truncated before CUSTO TOTAL: keep what the block gathered.
    finish(&mut current, &mut parse);
    parse
}
