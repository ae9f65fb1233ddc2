//! Harvesting run outputs into a study table, persisting it, and running
//! post-processing plugins over it.

pub mod harvest;
pub mod parsers;
pub mod plugins;
pub mod store;
pub mod table;
pub mod uniques;

pub use harvest::{fingerprint, harvest, harvest_into_store, HarvestOptions, HarvestReport, ParseError};
pub use parsers::{
    literal_to_json, ArtifactParser, JsonParser, KeyValueParser, OptionsFileParser, ScoopEntry,
};
pub use plugins::{
    builtin_plugin, builtin_plugins, run_pipeline, select_plugins, ExportCsv, ExportJson, FnPlugin,
    Plugin, PluginContext, ReportUniques,
};
pub use store::{TableStore, STORE_SCHEMA};
pub use table::{compare_values, Fields, RunRecord, StudyTable};
pub use uniques::parametric_uniques;
