//! Sector classification port trait.

pub trait SectorPort {
    /// Sector of `symbol`, or `None` when unclassified.
    fn sector_of(&self, symbol: &str) -> Option<String>;
}
