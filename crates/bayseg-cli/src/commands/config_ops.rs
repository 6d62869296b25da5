use std::fs;

use bayseg_core::settings;

pub fn settings_export() {
    print!("{}", settings::default_toml());
}

pub fn settings_validate(file: &str) {
    let content = die!(fs::read_to_string(file), "Error reading {file}: {}");
    let s = die!(settings::parse_settings_toml(&content), "Error: {}");
    println!(
        "OK: model.theta={}, model.d={}, model.max_word_length={}, training.epochs={}, training.batch_size={}",
        s.model.theta, s.model.d, s.model.max_word_length, s.training.epochs, s.training.batch_size
    );
}

/// Install a custom settings file before anything reads the defaults.
pub fn settings_load(file: &str) {
    let content = die!(fs::read_to_string(file), "Error reading {file}: {}");
    die!(settings::init_custom(content), "Error in {file}: {}");
}
