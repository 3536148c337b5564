//! Fixed sector classification read from a `[sectors]` config section.
//!
//! ```ini
//! [sectors]
//! 600000 = Banks
//! 600519 = Beverages
//! ```

use crate::ports::config_port::ConfigPort;
use crate::ports::sector_port::SectorPort;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct StaticSectorAdapter {
    sectors: HashMap<String, String>,
}

impl StaticSectorAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Self {
        let sectors = config
            .section_keys("sectors")
            .into_iter()
            .filter_map(|symbol| {
                config
                    .get_string("sectors", &symbol)
                    .filter(|sector| !sector.trim().is_empty())
                    .map(|sector| (symbol.to_lowercase(), sector.trim().to_string()))
            })
            .collect();
        Self { sectors }
    }

    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let sectors = pairs
            .into_iter()
            .map(|(symbol, sector)| (symbol.to_lowercase(), sector.to_string()))
            .collect();
        Self { sectors }
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }
}

impl SectorPort for StaticSectorAdapter {
    fn sector_of(&self, symbol: &str) -> Option<String> {
        self.sectors.get(&symbol.trim().to_lowercase()).cloned()
    }
}
