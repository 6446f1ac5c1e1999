//! Payload intake and worksheet classification.
//!
//! Publishers ship the catalogs as `.xlsx`, sometimes wrapped in a
//! `.zip` with press-release PDFs next to it. Intake unwraps the
//! archive, and each worksheet name is normalized and run through a
//! prioritized rule list: first matching rule tags the sheet, unmatched
//! sheets are ignored. New publisher dialects extend the rule list
//! instead of growing branch logic.

use std::io::Read;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{ChargeRegime, Period};

/// ZIP local-file-header magic.
pub const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// The 27 Brazilian federative units, the region axis of the price index.
pub const REGIONS: [&str; 27] = [
    "AC", "AL", "AP", "AM", "BA", "CE", "DF", "ES", "GO", "MA", "MT", "MS", "MG", "PA", "PB",
    "PR", "PE", "PI", "RJ", "RN", "RS", "RO", "RR", "SC", "SP", "SE", "TO",
];

static PERIOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(20\d{2})[-_]?(0[1-9]|1[0-2])").unwrap());

// Underscore-separated filenames are the norm, so letter boundaries
// are checked by hand instead of `\b` (underscore is a word character).
static REGION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:^|[^A-Z])(AC|AL|AP|AM|BA|CE|DF|ES|GO|MA|MT|MS|MG|PA|PB|PR|PE|PI|RJ|RN|RS|RO|RR|SC|SP|SE|TO)(?:[^A-Z]|$)",
    )
    .unwrap()
});

/// Which catalog a sheet carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    /// Composition (priced service) catalog.
    Composition,
    /// Input (material/labor/equipment) catalog.
    Input,
}

/// Classification outcome for one worksheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetTag {
    Catalog {
        kind: CatalogKind,
        regime: ChargeRegime,
    },
    /// Analytic breakdown (parent → child coefficients), parsed by a
    /// separate extractor and excluded from catalog classification.
    Analytic,
}

/// A classified worksheet.
#[derive(Debug, Clone)]
pub struct ClassifiedSheet {
    pub name: String,
    pub tag: SheetTag,
}

/// Uppercases and strips diacritics plus everything non-alphanumeric,
/// so "Composições Não Desonerado" and "COMPOSICOESNAODESONERADO"
/// classify identically.
pub fn normalize_sheet_name(name: &str) -> String {
    fold_text(name)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// ASCII-folds the Portuguese accented letters and uppercases. Good
/// enough for sheet names and header tokens; anything outside the
/// table passes through unchanged.
pub fn fold_text(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'ç' | 'Ç' => 'C',
            'ñ' | 'Ñ' => 'N',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

fn no_charges_marker(norm: &str) -> bool {
    norm.contains("NAODESON")
        || norm.contains("NODESON")
        || (norm.contains("NAO") && norm.contains("DESON"))
}

/// One classification rule: a predicate over the normalized sheet name
/// and the tag it assigns.
pub struct SheetRule {
    pub name: &'static str,
    pub matches: fn(&str) -> bool,
    pub tag: SheetTag,
}

/// The classification rules, evaluated in order; first match wins.
/// Prefix rules cover the compact sheet names ("CCD", "ISD 2024"),
/// free-text rules the verbose ones ("Composições Não Desonerado").
/// The "without charges" free-text rules sit above their "with"
/// counterparts so the negation marker is checked first. New publisher
/// dialects extend this table.
pub const SHEET_RULES: &[SheetRule] = &[
    SheetRule {
        name: "analytic",
        matches: |n| n.contains("ANALIT"),
        tag: SheetTag::Analytic,
    },
    SheetRule {
        name: "ccd",
        matches: |n| n.starts_with("CCD"),
        tag: SheetTag::Catalog {
            kind: CatalogKind::Composition,
            regime: ChargeRegime::WithCharges,
        },
    },
    SheetRule {
        name: "csd",
        matches: |n| n.starts_with("CSD"),
        tag: SheetTag::Catalog {
            kind: CatalogKind::Composition,
            regime: ChargeRegime::WithoutCharges,
        },
    },
    SheetRule {
        name: "icd",
        matches: |n| n.starts_with("ICD"),
        tag: SheetTag::Catalog {
            kind: CatalogKind::Input,
            regime: ChargeRegime::WithCharges,
        },
    },
    SheetRule {
        name: "isd",
        matches: |n| n.starts_with("ISD"),
        tag: SheetTag::Catalog {
            kind: CatalogKind::Input,
            regime: ChargeRegime::WithoutCharges,
        },
    },
    SheetRule {
        name: "compositions-without",
        matches: |n| n.contains("COMPOSICOES") && no_charges_marker(n),
        tag: SheetTag::Catalog {
            kind: CatalogKind::Composition,
            regime: ChargeRegime::WithoutCharges,
        },
    },
    SheetRule {
        name: "compositions-with",
        matches: |n| n.contains("COMPOSICOES"),
        tag: SheetTag::Catalog {
            kind: CatalogKind::Composition,
            regime: ChargeRegime::WithCharges,
        },
    },
    SheetRule {
        name: "inputs-without",
        matches: |n| n.contains("INSUMOS") && no_charges_marker(n),
        tag: SheetTag::Catalog {
            kind: CatalogKind::Input,
            regime: ChargeRegime::WithoutCharges,
        },
    },
    SheetRule {
        name: "inputs-with",
        matches: |n| n.contains("INSUMOS"),
        tag: SheetTag::Catalog {
            kind: CatalogKind::Input,
            regime: ChargeRegime::WithCharges,
        },
    },
];

/// Classifies a single sheet name, or `None` when no rule matches.
pub fn classify_sheet(name: &str) -> Option<SheetTag> {
    let norm = normalize_sheet_name(name);
    SHEET_RULES
        .iter()
        .find(|rule| (rule.matches)(&norm))
        .map(|rule| rule.tag)
}

/// Classifies every sheet of a workbook, dropping unmatched names.
pub fn classify_sheets<'a, I: IntoIterator<Item = &'a str>>(names: I) -> Vec<ClassifiedSheet> {
    names
        .into_iter()
        .filter_map(|name| {
            classify_sheet(name).map(|tag| ClassifiedSheet {
                name: name.to_string(),
                tag,
            })
        })
        .collect()
}

/// Unwraps a payload: ZIP archives yield their largest spreadsheet
/// entry (temp-file names skipped) and that entry's name becomes the
/// effective filename for period/region detection. Anything else
/// passes through untouched.
pub fn unwrap_payload(bytes: Vec<u8>, filename: &str) -> Result<(Vec<u8>, String), String> {
    if !bytes.starts_with(&ZIP_MAGIC) {
        return Ok((bytes, filename.to_string()));
    }

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(&bytes))
        .map_err(|e| format!("could not open archive: {}", e))?;

    let mut best: Option<(String, u64)> = None;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| format!("could not read archive entry: {}", e))?;
        let name = entry.name().to_string();
        let base = name.rsplit('/').next().unwrap_or(&name);
        if base.starts_with('~') {
            continue;
        }
        if !(name.ends_with(".xls") || name.ends_with(".xlsx")) {
            continue;
        }
        if best.as_ref().map_or(true, |(_, size)| entry.size() > *size) {
            best = Some((name, entry.size()));
        }
    }

    let (target, _) = best.ok_or_else(|| "no spreadsheet found inside the archive".to_string())?;
    let mut entry = archive
        .by_name(&target)
        .map_err(|e| format!("could not read {}: {}", target, e))?;
    let mut out = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut out)
        .map_err(|e| format!("could not extract {}: {}", target, e))?;
    Ok((out, target))
}

/// Extracts the validity period from a `YYYY[-_]MM`-shaped filename
/// token (`SINAPI_202407.zip`, `RS 07-2024` does not match — the
/// publishers put year first).
pub fn period_from_filename(filename: &str) -> Option<Period> {
    let caps = PERIOD_RE.captures(filename)?;
    let year = caps.get(1)?.as_str().parse().ok()?;
    let month = caps.get(2)?.as_str().parse().ok()?;
    Some(Period { year, month })
}

/// Finds a two-letter UF token in the filename, used as the fallback
/// region for single-region workbooks.
pub fn region_from_filename(filename: &str) -> Option<String> {
    REGION_RE
        .captures(&fold_text(filename))
        .map(|caps| caps[1].to_string())
}
