//! Snapshot tests for the inspection summary.

use bmcfw_image::parser::altera::RPD_SIZE;
use bmcfw_image::prelude::*;
use insta::assert_snapshot;

#[test]
fn test_altera_summary() -> ImageResult<()> {
    let mut raw = vec![0x00; RPD_SIZE];
    raw[0] = 0x10;
    raw.push(0x81);
    let image = ImageFormat::Altera.parse(&raw)?;
    assert_snapshot!(image.summary().to_string(), @r"
    vendor:   Altera
    size:     376833 bytes
    payload:  376832 bytes
    checksum: sum32:00000010
    ");
    Ok(())
}

#[test]
fn test_bios_summary() -> ImageResult<()> {
    let image = ImageFormat::Bios.parse(b"abc")?;
    assert_snapshot!(image.summary().to_string(), @r"
    vendor:   BIOS
    size:     3 bytes
    payload:  3 bytes
    checksum: sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad
    ");
    Ok(())
}

#[test]
fn test_unknown_format_message() {
    let err = "srec".parse::<ImageFormat>().err().map(|e| e.to_string());
    assert_snapshot!(err.unwrap_or_default(), @r#"Unsupported image: unknown image format "srec""#);
}
