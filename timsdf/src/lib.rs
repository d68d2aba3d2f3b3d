// src/lib.rs
pub mod config;
pub mod error;

pub mod data {
    pub mod acquisition;
    pub mod raw;
    pub mod handle;
    pub mod frame;
    pub mod utility;
    pub mod source;
    pub mod meta;
    pub mod scan;
    pub mod builder;
    pub mod dataset;
}
