// SPDX-License-Identifier: Apache-2.0

//! The driver pins the library by path and version; both must move together
//! when the version is bumped.

fn manifest(path: &str) -> toml::Value {
    let text = std::fs::read_to_string(path).unwrap();
    toml::from_str(&text).unwrap()
}

#[test]
fn test_driver_pins_current_library_version() {
    let root = manifest(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"));
    let driver = manifest(concat!(env!("CARGO_MANIFEST_DIR"), "/qmorph-driver/Cargo.toml"));
    let version = root["package"]["version"].as_str().unwrap();
    assert_eq!(version, env!("CARGO_PKG_VERSION"));
    assert_eq!(
        driver["dependencies"]["qmorph"]["version"].as_str(),
        Some(version)
    );
    assert_eq!(driver["package"]["version"].as_str(), Some(version));
}
