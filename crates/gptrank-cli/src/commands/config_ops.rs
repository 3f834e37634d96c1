use std::fs;

pub fn settings_export() {
    print!("{}", gptrank_core::settings::default_toml());
}

pub fn settings_validate(file: &str) {
    let content = die!(fs::read_to_string(file), "Error reading {file}: {}");
    let s = die!(
        gptrank_core::settings::parse_settings_toml(&content),
        "Error: {}"
    );
    println!("OK");
    println!("  scoring.normalization      = {:?}", s.scoring.normalization);
    println!("  scoring.skip_shared_prefix = {}", s.scoring.skip_shared_prefix);
    println!("  generate.max_tokens        = {}", s.generate.max_tokens);
    println!("  generate.stop_at_eos       = {}", s.generate.stop_at_eos);
}

/// Install a settings file as the process-wide configuration.
pub fn load_settings(file: &str) {
    let content = die!(fs::read_to_string(file), "Error reading {file}: {}");
    die!(
        gptrank_core::settings::init_custom(content),
        "Error in {file}: {}"
    );
}
