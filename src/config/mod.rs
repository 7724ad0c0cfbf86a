pub mod settlement;

pub use settlement::SettlementConfig;
