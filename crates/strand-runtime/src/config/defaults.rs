//! Compile-time defaults, merged by build.rs from the library values and
//! the optional `STRAND_CONFIG_RS` file.

include!(concat!(env!("OUT_DIR"), "/strand_merged_config.rs"));
