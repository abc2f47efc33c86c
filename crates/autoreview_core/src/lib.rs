pub mod broken_wikicode;
pub mod cache;
pub mod categories;
pub mod checks;
pub mod client;
pub mod config;
pub mod context;
pub mod html;
pub mod isbn;
pub mod living_person;
pub mod lookup;
pub mod mediawiki;
pub mod model;
pub mod ores;
pub mod pipeline;
pub mod redirect;
pub mod references;
pub mod revert;
pub mod runtime;
pub mod similarity;
pub mod store;

#[cfg(test)]
mod testing;
