//! App-installer manifest parsing.
//!
//! ```xml
//! <AppInstaller Uri="https://example.com/App.appinstaller" Version="1.2.3.4">
//!   <MainBundle Name="App" Version="1.2.3.4" Uri="https://example.com/App.msixbundle" />
//! </AppInstaller>
//! ```

use crate::error::ParseError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use url::Url;

const MAIN_BUNDLE: &str = "MainBundle";

/// Identity and location of a remote package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    name: String,
    version: String,
    download_url: Url,
}

impl PackageDescriptor {
    /// Build a descriptor, rejecting empty fields and relative URIs.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        download_url: &str,
    ) -> Result<Self, ParseError> {
        let name = name.into();
        let version = version.into();
        if name.trim().is_empty() {
            return Err(ParseError::MissingField("MainBundle/@Name"));
        }
        if version.trim().is_empty() {
            return Err(ParseError::MissingField("MainBundle/@Version"));
        }
        if download_url.trim().is_empty() {
            return Err(ParseError::MissingField("MainBundle/@Uri"));
        }
        let download_url = Url::parse(download_url.trim())
            .map_err(|_| ParseError::InvalidUri(download_url.to_string()))?;

        Ok(Self {
            name,
            version,
            download_url,
        })
    }

    /// Package identity name from the manifest's `Name` attribute.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version exactly as published; may carry incidental whitespace.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Absolute location of the package to deploy.
    pub fn download_url(&self) -> &Url {
        &self.download_url
    }
}

/// A parsed manifest document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Where the manifest itself is published (root `Uri`), if present.
    pub installer_uri: Option<String>,
    /// Version of the manifest document (root `Version`), if present.
    pub installer_version: Option<String>,
    /// The package the manifest points at.
    pub main_bundle: PackageDescriptor,
}

/// Parse a manifest and return its main bundle descriptor.
pub fn parse(document: &[u8]) -> Result<PackageDescriptor, ParseError> {
    parse_manifest(document).map(|manifest| manifest.main_bundle)
}

/// Parse a full manifest document. Performs no I/O.
pub fn parse_manifest(document: &[u8]) -> Result<Manifest, ParseError> {
    let mut reader = Reader::from_reader(document);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut root: Option<RootAttributes> = None;
    let mut bundle: Option<BundleAttributes> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| ParseError::Malformed(err.to_string()))?;

        match event {
            Event::Start(element) => {
                visit_element(&element, depth, &mut root, &mut bundle)?;
                depth += 1;
            }
            Event::Empty(element) => visit_element(&element, depth, &mut root, &mut bundle)?,
            Event::End(_) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ParseError::Malformed("unexpected closing tag".into()))?;
            }
            Event::Text(text) if depth == 0 && !text.iter().all(u8::is_ascii_whitespace) => {
                return Err(ParseError::Malformed("text outside the root element".into()));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let root = root.ok_or_else(|| ParseError::Malformed("document has no root element".into()))?;
    if depth != 0 {
        return Err(ParseError::Malformed("document ends inside an element".into()));
    }

    let bundle = bundle.ok_or(ParseError::MissingField(MAIN_BUNDLE))?;
    let name = bundle.name.ok_or(ParseError::MissingField("MainBundle/@Name"))?;
    let version = bundle
        .version
        .ok_or(ParseError::MissingField("MainBundle/@Version"))?;
    let uri = bundle.uri.ok_or(ParseError::MissingField("MainBundle/@Uri"))?;

    Ok(Manifest {
        installer_uri: root.uri,
        installer_version: root.version,
        main_bundle: PackageDescriptor::new(name, version, &uri)?,
    })
}

struct RootAttributes {
    uri: Option<String>,
    version: Option<String>,
}

struct BundleAttributes {
    name: Option<String>,
    version: Option<String>,
    uri: Option<String>,
}

fn visit_element(
    element: &BytesStart<'_>,
    depth: usize,
    root: &mut Option<RootAttributes>,
    bundle: &mut Option<BundleAttributes>,
) -> Result<(), ParseError> {
    if depth == 0 {
        if root.is_some() {
            return Err(ParseError::Malformed("more than one root element".into()));
        }
        *root = Some(RootAttributes {
            uri: attribute(element, "Uri")?,
            version: attribute(element, "Version")?,
        });
    } else if depth == 1 && element.local_name().as_ref() == MAIN_BUNDLE.as_bytes() {
        if bundle.is_some() {
            return Err(ParseError::Malformed("more than one MainBundle element".into()));
        }
        *bundle = Some(BundleAttributes {
            name: attribute(element, "Name")?,
            version: attribute(element, "Version")?,
            uri: attribute(element, "Uri")?,
        });
    }
    Ok(())
}

/// Unescaped attribute value; empty values count as absent.
fn attribute(element: &BytesStart<'_>, name: &str) -> Result<Option<String>, ParseError> {
    for attr in element.attributes() {
        let attr = attr.map_err(|err| ParseError::Malformed(err.to_string()))?;
        if attr.key.local_name().as_ref() != name.as_bytes() {
            continue;
        }
        let value = attr
            .unescape_value()
            .map_err(|err| ParseError::Malformed(err.to_string()))?;
        if value.trim().is_empty() {
            return Ok(None);
        }
        return Ok(Some(value.into_owned()));
    }
    Ok(None)
}
