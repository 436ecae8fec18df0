//! JUNIT_XML test reports

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{upload_and_craft, CraftContext, MaterialError};
use crate::api::{Material, MaterialType};

/// Parse the whole document; the root must be `<testsuites>` or `<testsuite>`
fn check_junit<R: std::io::BufRead>(source: R) -> Result<(), String> {
    let mut reader = Reader::from_reader(source);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if !saw_root {
                    check_root(e.name().as_ref())?;
                    saw_root = true;
                }
                depth += 1;
            }
            Ok(Event::Empty(e)) => {
                if !saw_root {
                    check_root(e.name().as_ref())?;
                    saw_root = true;
                }
            }
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "malformed XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
        }
        buf.clear();
    }

    if !saw_root {
        return Err("no root element".into());
    }
    if depth != 0 {
        return Err("unexpected end of document".into());
    }
    Ok(())
}

fn check_root(name: &[u8]) -> Result<(), String> {
    match name {
        b"testsuites" | b"testsuite" => Ok(()),
        other => Err(format!(
            "root element <{}> is not testsuites or testsuite",
            String::from_utf8_lossy(other)
        )),
    }
}

pub(super) fn craft(id: &str, value: &str, ctx: CraftContext<'_>) -> Result<Material, MaterialError> {
    let kind = MaterialType::JunitXml;
    let path = Path::new(value);
    let file = File::open(path).map_err(|e| MaterialError::io(path, e))?;
    check_junit(BufReader::new(file)).map_err(|reason| MaterialError::invalid(kind, reason))?;
    upload_and_craft(kind, id, path, ctx.backend)
}
