use std::collections::BTreeMap;
use std::fmt;
use serde::{Deserialize, Serialize};
use crate::types::ids::{SourceId, Symbol};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Equity,
    Index,
    Forex,
    Commodity,
    Crypto,
    Rates,
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetClass::Equity => "equity",
            AssetClass::Index => "index",
            AssetClass::Forex => "forex",
            AssetClass::Commodity => "commodity",
            AssetClass::Crypto => "crypto",
            AssetClass::Rates => "rates",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Quote,
    History,
    Positioning,
}

impl DataType {
    pub const ALL: [DataType; 3] = [DataType::Quote, DataType::History, DataType::Positioning];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Quote => "quote",
            DataType::History => "history",
            DataType::Positioning => "positioning",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked symbol and how each provider names it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: Symbol,
    pub asset_class: AssetClass,
    /// Contract code used by positioning-report providers.
    #[serde(default)]
    pub report_code: Option<String>,
    #[serde(default)]
    pub aliases: BTreeMap<SourceId, String>,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, asset_class: AssetClass) -> Self {
        Instrument {
            symbol: Symbol::new(symbol),
            asset_class,
            report_code: None,
            aliases: BTreeMap::new(),
        }
    }

    pub fn with_report_code(mut self, code: impl Into<String>) -> Self {
        self.report_code = Some(code.into());
        self
    }

    pub fn with_alias(mut self, source: impl Into<String>, symbol: impl Into<String>) -> Self {
        self.aliases.insert(SourceId::new(source), symbol.into());
        self
    }

    /// The ticker a given provider expects for this instrument.
    pub fn symbol_for(&self, source: &SourceId) -> &str {
        self.aliases
            .get(source)
            .map(String::as_str)
            .unwrap_or_else(|| self.symbol.as_str())
    }

    /// Data types fetched for this instrument each cycle.
    pub fn data_types(&self) -> Vec<DataType> {
        let mut types = vec![DataType::Quote, DataType::History];
        if self.report_code.is_some() {
            types.push(DataType::Positioning);
        }
        types
    }
}
