//! SQL conversion setup: the schema-conversion (`.sct`) metadata file.

use std::collections::BTreeSet;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::SetupError;

pub const SUPPORTED_SOURCE_VENDORS: &[&str] = &["oracle"];
pub const SUPPORTED_TARGET_VENDORS: &[&str] =
    &["postgresql", "aurora_postgresql", "rds_postgresql"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMetadata {
    pub source_vendor: String,
    pub target_vendor: String,
    pub server_name: String,
    pub schemas: BTreeSet<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Sources,
    Targets,
}

pub fn read_sct_metadata(path: &Path) -> Result<SqlMetadata, SetupError> {
    let text = std::fs::read_to_string(path)
        .map_err(|_| SetupError::NoSqlMetadata(path.display().to_string()))?;
    parse_sct_metadata(&text)
}

pub fn parse_sct_metadata(xml: &str) -> Result<SqlMetadata, SetupError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut section = Section::None;
    let mut found = Found::default();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| SetupError::InvalidSqlMetadata(e.to_string()))?;
        match event {
            Event::Start(e) => {
                match e.name().as_ref() {
                    b"sources" => section = Section::Sources,
                    b"targets" => section = Section::Targets,
                    _ => {}
                }
                found.visit(&e, section)?;
            }
            Event::Empty(e) => {
                found.visit(&e, section)?;
            }
            Event::End(e) => {
                if matches!(e.name().as_ref(), b"sources" | b"targets") {
                    section = Section::None;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let Found {
        source_vendor,
        target_vendor,
        server_name,
        schemas,
    } = found;
    let source_vendor = source_vendor.trim().to_ascii_lowercase();
    let target_vendor = target_vendor.trim().to_ascii_lowercase();
    if !SUPPORTED_SOURCE_VENDORS.contains(&source_vendor.as_str()) {
        return Err(SetupError::InvalidSqlMetadata(format!(
            "unsupported source database '{}'",
            source_vendor
        )));
    }
    if !SUPPORTED_TARGET_VENDORS.contains(&target_vendor.as_str()) {
        return Err(SetupError::InvalidSqlMetadata(format!(
            "unsupported target database '{}'",
            target_vendor
        )));
    }
    if server_name.trim().is_empty() {
        return Err(SetupError::InvalidSqlMetadata(
            "source server name is missing".to_string(),
        ));
    }
    if schemas.is_empty() {
        return Err(SetupError::InvalidSqlMetadata(
            "no schemas listed".to_string(),
        ));
    }

    Ok(SqlMetadata {
        source_vendor,
        target_vendor,
        server_name: server_name.trim().to_string(),
        schemas,
    })
}

#[derive(Default)]
struct Found {
    source_vendor: String,
    target_vendor: String,
    server_name: String,
    schemas: BTreeSet<String>,
}

impl Found {
    fn visit(&mut self, e: &BytesStart<'_>, section: Section) -> Result<(), SetupError> {
        match e.name().as_ref() {
            b"DbServer" => {
                let vendor = attribute(e, b"vendor")?.unwrap_or_default();
                match section {
                    Section::Sources => {
                        self.source_vendor = vendor;
                        self.server_name = attribute(e, b"name")?.unwrap_or_default();
                    }
                    Section::Targets => self.target_vendor = vendor,
                    Section::None => {}
                }
            }
            b"FullNameNodeInfo" => {
                if attribute(e, b"typeNode")?.as_deref() == Some("schema")
                    && let Some(name) = attribute(e, b"nameNode")?
                {
                    self.schemas.insert(name.trim().to_ascii_uppercase());
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, SetupError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| SetupError::InvalidSqlMetadata(err.to_string()))?;
        if attr.key.as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|err| SetupError::InvalidSqlMetadata(err.to_string()))?;
            return Ok(Some(value.to_string()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tree>
  <instances>
    <ProjectModel>
      <entities>
        <sources>
          <DbServer vendor="oracle" name="sample.rds.amazonaws.com">
            <connection/>
          </DbServer>
        </sources>
        <targets>
          <DbServer vendor="aurora_postgresql" name="target.example"/>
        </targets>
      </entities>
      <relations>
        <server-node-location>
          <FullNameNodeInfoList>
            <nameParts>
              <FullNameNodeInfo typeNode="schema" nameNode="ecom"/>
              <FullNameNodeInfo typeNode="table" nameNode="orders"/>
            </nameParts>
          </FullNameNodeInfoList>
        </server-node-location>
        <server-node-location>
          <FullNameNodeInfoList>
            <nameParts>
              <FullNameNodeInfo typeNode="schema" nameNode="HR"/>
            </nameParts>
          </FullNameNodeInfoList>
        </server-node-location>
      </relations>
    </ProjectModel>
  </instances>
</tree>"#;

    #[test]
    fn parses_vendors_server_and_schemas() {
        let meta = parse_sct_metadata(SCT).unwrap();
        assert_eq!(meta.source_vendor, "oracle");
        assert_eq!(meta.target_vendor, "aurora_postgresql");
        assert_eq!(meta.server_name, "sample.rds.amazonaws.com");
        assert_eq!(
            meta.schemas.iter().cloned().collect::<Vec<_>>(),
            vec!["ECOM".to_string(), "HR".to_string()]
        );
    }

    #[test]
    fn rejects_unsupported_source_vendor() {
        let xml = SCT.replace("vendor=\"oracle\"", "vendor=\"mysql\"");
        let err = parse_sct_metadata(&xml).unwrap_err();
        assert!(matches!(err, SetupError::InvalidSqlMetadata(msg) if msg.contains("mysql")));
    }

    #[test]
    fn rejects_metadata_without_schemas() {
        let xml = SCT.replace("typeNode=\"schema\"", "typeNode=\"view\"");
        assert!(matches!(
            parse_sct_metadata(&xml),
            Err(SetupError::InvalidSqlMetadata(_))
        ));
    }

    #[test]
    fn missing_file_is_reported_as_missing() {
        let err = read_sct_metadata(Path::new("/nonexistent/project.sct")).unwrap_err();
        assert!(matches!(err, SetupError::NoSqlMetadata(_)));
    }
}
