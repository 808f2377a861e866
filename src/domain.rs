use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

pub const DEFAULT_DATABASE: &str = "snp";
pub const OMIM_LABEL: &str = "OMIM";

/// Allele code as entered by the user, normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Allele(String);

impl Allele {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Text searched for inside lower-cased dbSNP record lines.
    ///
    /// Two-base IUPAC ambiguity codes expand to the slash notation dbSNP
    /// uses for biallelic variants; other codes are matched literally.
    pub fn token(&self) -> String {
        let expanded = match self.0.as_str() {
            "R" => "a/g",
            "Y" => "c/t",
            "S" => "c/g",
            "W" => "a/t",
            "K" => "g/t",
            "M" => "a/c",
            other => return other.to_lowercase(),
        };
        expanded.to_string()
    }
}

impl fmt::Display for Allele {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Allele {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let is_valid = !normalized.is_empty()
            && normalized.len() <= 8
            && normalized.chars().all(|ch| ch.is_ascii_alphabetic());
        if !is_valid {
            return Err(HarvestError::InvalidAllele(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for Allele {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Allele> for String {
    fn from(value: Allele) -> Self {
        value.0
    }
}

/// The database/allele pair a raw dataset and its reports belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub database: String,
    pub omim: bool,
    pub allele: Allele,
}

impl Dataset {
    pub fn new(database: impl Into<String>, omim: bool, allele: Allele) -> Self {
        Self {
            database: database.into(),
            omim,
            allele,
        }
    }

    /// Label used in file names: `OMIM` for OMIM-filtered runs, otherwise
    /// the upper-cased database name.
    pub fn label(&self) -> String {
        if self.omim {
            OMIM_LABEL.to_string()
        } else {
            self.database.to_uppercase()
        }
    }

    pub fn default_term(&self) -> String {
        default_search_term(&self.allele, self.omim)
    }
}

/// Default esearch query: validated common human SNPs carrying the allele.
pub fn default_search_term(allele: &Allele, omim: bool) -> String {
    let base = "(\"Homo sapiens\"[Organism] OR homo sapiens[All Fields]) AND (snp[Snp_Class] AND ";
    let maf = "(00000.0500[GLOBAL_MAF] : 00000.5000[GLOBAL_MAF]) AND by 1000g[Validation] NOT merged rs[Filter]";
    if omim {
        format!("{base}snp_omim[Filter] AND {maf} AND {allele}[ALLELE])")
    } else {
        format!("{base}{maf} AND {allele}[ALLELE])")
    }
}

/// Server-side handle to an executed esearch (history server entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCursor {
    pub count: u64,
    pub key: String,
    pub env: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub database: &'a str,
    pub cursor: &'a SearchCursor,
    pub page_size: u64,
    pub offset: u64,
}
