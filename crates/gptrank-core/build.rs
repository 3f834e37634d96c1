fn main() {
    println!("cargo:rerun-if-changed=src/default_settings.toml");
    // The embedded defaults must parse and carry every section.
    check_settings(
        "src/default_settings.toml",
        include_str!("src/default_settings.toml"),
        &["scoring", "generate"],
    );
}

fn check_settings(path: &str, content: &str, sections: &[&str]) {
    let value: toml::Value = content
        .parse()
        .unwrap_or_else(|e| panic!("{path} contains invalid TOML: {e}"));
    for section in sections {
        if value.get(section).and_then(toml::Value::as_table).is_none() {
            panic!("{path} is missing the [{section}] table");
        }
    }
}
