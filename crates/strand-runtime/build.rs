//! Build script for strand-runtime
//!
//! Handles configuration merging:
//! 1. Start with library defaults
//! 2. If STRAND_CONFIG_RS env var is set, parse the user's config file
//! 3. Merge user values over defaults (user wins)
//! 4. Generate OUT_DIR/strand_merged_config.rs
//!
//! The user file only needs the constants it wants to change, written as
//! `pub const NAME: TYPE = VALUE;`.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

struct ConfigParam {
    name: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

const CONFIG_PARAMS: &[ConfigParam] = &[
    ConfigParam {
        name: "STACK_SIZE",
        rust_type: "usize",
        default_value: "256 * 1024",
    },
    ConfigParam {
        name: "STACK_CACHE",
        rust_type: "usize",
        default_value: "64",
    },
    ConfigParam {
        name: "CREDITS_PER_ITERATION",
        rust_type: "i32",
        default_value: "32",
    },
    ConfigParam {
        name: "IO_MODE",
        rust_type: "&str",
        default_value: "\"epoll-edge\"",
    },
    ConfigParam {
        name: "MAX_EVENTS",
        rust_type: "usize",
        default_value: "256",
    },
    ConfigParam {
        // 1/1024 s, so a poll timeout never fires just before the deadline
        name: "TIMER_SLACK_US",
        rust_type: "u64",
        default_value: "977",
    },
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = Path::new(&out_dir).join("strand_merged_config.rs");

    let mut config: HashMap<&str, String> = CONFIG_PARAMS
        .iter()
        .map(|p| (p.name, p.default_value.to_string()))
        .collect();

    if let Ok(user_path) = env::var("STRAND_CONFIG_RS") {
        println!("cargo:rerun-if-changed={}", user_path);

        match fs::read_to_string(&user_path) {
            Ok(content) => {
                parse_and_merge(&content, &mut config);
                println!("cargo:warning=Using custom config: {}", user_path);
            }
            Err(e) => {
                println!(
                    "cargo:warning=Failed to read STRAND_CONFIG_RS ({}): {}",
                    user_path, e
                );
            }
        }
    }

    println!("cargo:rerun-if-env-changed=STRAND_CONFIG_RS");

    let output = generate_config(&config);
    fs::write(&dest_path, output).expect("Failed to write merged config");
}

/// Merge `pub const` lines of a user file over the defaults
fn parse_and_merge(content: &str, config: &mut HashMap<&str, String>) {
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") || !line.starts_with("pub const ") {
            continue;
        }

        let Some((name, value)) = parse_const_line(line) else {
            continue;
        };
        match CONFIG_PARAMS.iter().find(|p| p.name == name) {
            Some(param) => {
                config.insert(param.name, value);
            }
            None => println!("cargo:warning=Unknown config parameter: {}", name),
        }
    }
}

/// `pub const NAME: TYPE = VALUE;` -> (NAME, VALUE)
fn parse_const_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("pub const ")?.trim();

    let colon_pos = rest.find(':')?;
    let name = rest[..colon_pos].trim().to_string();

    let eq_pos = rest.find('=')?;
    let semi_pos = rest.rfind(';').unwrap_or(rest.len());
    let value = rest[eq_pos + 1..semi_pos].trim().to_string();

    Some((name, value))
}

fn generate_config(config: &HashMap<&str, String>) -> String {
    let mut output = String::new();

    output.push_str("// Auto-generated by build.rs - do not edit\n");
    output.push_str("// Configuration merged from library defaults");
    if env::var("STRAND_CONFIG_RS").is_ok() {
        output.push_str(" and the STRAND_CONFIG_RS file");
    }
    output.push_str("\n\n");

    for param in CONFIG_PARAMS {
        let value = config
            .get(param.name)
            .map(String::as_str)
            .unwrap_or(param.default_value);
        output.push_str(&format!(
            "pub const {}: {} = {};\n",
            param.name, param.rust_type, value
        ));
    }

    output
}
