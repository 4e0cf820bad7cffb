use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{MissionError, Result};
use crate::models::{CoordinateRing, RingVertex};
use crate::naming::{name_or_fallback, source_stem, DEFAULT_NAMING_FIELD};
use crate::xml_document::{Namespaces, XmlDocument, XmlElement, XmlPath};

/// Where a polygon outline may live, most specific first.
pub const COORDINATE_PATHS: &[&str] = &[
    ".//kml:Polygon/kml:outerBoundaryIs/kml:LinearRing/kml:coordinates",
    ".//kml:LinearRing/kml:coordinates",
    ".//kml:coordinates",
];

/// Field name that selects the placemark's own `<name>`.
pub const PLACEMARK_NAME_FIELD: &str = "name";

/// Compile `COORDINATE_PATHS` against a document's namespaces.
pub fn coordinate_paths(namespaces: &Namespaces) -> Result<Vec<XmlPath>> {
    COORDINATE_PATHS.iter().map(|p| XmlPath::parse(p, namespaces)).collect()
}

/// First coordinate block found by `paths`, tried in order.
pub fn locate_coordinates<'a>(doc: &'a XmlDocument, paths: &'a [XmlPath]) -> Option<(&'a XmlElement, &'a XmlPath)> {
    paths.iter().find_map(|path| doc.find(path).map(|el| (el, path)))
}

/// Split a `<coordinates>` body into vertices. Tuples with fewer than two
/// components are skipped; altitude is dropped.
pub fn parse_coordinate_tokens(text: &str, source_name: &str) -> Result<Vec<RingVertex>> {
    let mut vertices = Vec::new();
    for token in text.split_whitespace() {
        let mut parts = token.split(',');
        let (Some(lon), Some(lat)) = (parts.next(), parts.next()) else { continue };
        let vertex = RingVertex::from_tokens(lon, lat).ok_or_else(|| {
            MissionError::not_found(source_name, format!("invalid coordinate tuple '{}'", token))
        })?;
        vertices.push(vertex);
    }
    if vertices.is_empty() {
        return Err(MissionError::not_found(source_name, "coordinate block has no lon,lat tuples"));
    }
    Ok(vertices)
}

/// A single-polygon KML document.
#[derive(Debug, Clone)]
pub struct KmlSource {
    source_name: String,
    stem: String,
    doc: XmlDocument,
    namespaces: Namespaces,
}

impl KmlSource {
    pub fn open(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| MissionError::io(format!("reading {}", path.display()), e))?;
        let source_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        KmlSource::parse(&text, &source_name, &source_stem(path))
    }

    pub fn parse(text: &str, source_name: &str, stem: &str) -> Result<Self> {
        let doc = XmlDocument::parse(text, source_name)?;
        let namespaces = Namespaces::detect(&doc);
        Ok(KmlSource { source_name: source_name.to_string(), stem: stem.to_string(), doc, namespaces })
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// The outline, closed, with the source's tokens kept verbatim.
    pub fn coordinate_ring(&self) -> Result<CoordinateRing> {
        let paths = coordinate_paths(&self.namespaces)?;
        let (element, _) = locate_coordinates(&self.doc, &paths)
            .ok_or_else(|| MissionError::not_found(&self.source_name, "no <coordinates> element"))?;
        let vertices = parse_coordinate_tokens(&element.text(), &self.source_name)?;
        CoordinateRing::new(vertices, &self.source_name)
    }

    /// Output name: the value of `field` (default `DYNM`), else the file stem.
    pub fn naming_hint(&self, field: Option<&str>) -> String {
        let field = field.filter(|f| !f.trim().is_empty()).unwrap_or(DEFAULT_NAMING_FIELD);
        let value = self.field_value(field);
        name_or_fallback(value.as_deref(), &self.stem)
    }

    fn field_value(&self, field: &str) -> Option<String> {
        let root = self.doc.root();
        let elements: Vec<&XmlElement> = std::iter::once(root).chain(root.descendants()).collect();
        let kml_ns = self.namespaces.get("kml");

        let non_empty = |el: &&XmlElement| !el.text().trim().is_empty();
        let named = |el: &&XmlElement, local: &str| el.local_name() == local && el.attribute("name") == Some(field);

        // Namespaced SimpleData first, then any SimpleData regardless of namespace.
        let simple = elements
            .iter()
            .copied()
            .filter(|el| named(el, "SimpleData") && el.namespace() == kml_ns)
            .find(non_empty)
            .or_else(|| elements.iter().copied().filter(|el| named(el, "SimpleData")).find(non_empty));
        if let Some(el) = simple {
            return Some(el.text().trim().to_string());
        }

        let data_value = elements
            .iter()
            .copied()
            .filter(|el| named(el, "Data"))
            .filter_map(|el| el.child_elements().find(|c| c.local_name() == "value"))
            .find(|value| !value.text().trim().is_empty());
        if let Some(value) = data_value {
            return Some(value.text().trim().to_string());
        }

        if field == PLACEMARK_NAME_FIELD {
            return elements
                .iter()
                .copied()
                .filter(|el| el.local_name() == "Placemark")
                .filter_map(|el| el.child_elements().find(|c| c.local_name() == "name"))
                .map(|name| name.text().trim().to_string())
                .find(|name| !name.is_empty());
        }
        None
    }

    /// Attribute names a caller could name outputs by.
    pub fn field_names(&self) -> BTreeSet<String> {
        let root = self.doc.root();
        let mut names = BTreeSet::new();
        for el in root.descendants() {
            match el.local_name() {
                "Data" | "SimpleData" => {
                    if let Some(name) = el.attribute("name") {
                        names.insert(name.to_string());
                    }
                }
                "Placemark" => {
                    if el.child_elements().any(|c| c.local_name() == "name") {
                        names.insert(PLACEMARK_NAME_FIELD.to_string());
                    }
                }
                _ => {}
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARCEL: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Placemark>
      <name>North field</name>
      <ExtendedData>
        <SchemaData schemaUrl="#parcels">
          <SimpleData name="DYNM">Block/7: east</SimpleData>
          <SimpleData name="OWNER"></SimpleData>
        </SchemaData>
        <Data name="crop"><value>rice</value></Data>
      </ExtendedData>
      <Polygon>
        <outerBoundaryIs>
          <LinearRing>
            <coordinates>
              127.0,36.0,0 127.01,36.0,0 127.01,36.01,0 127.0,36.01,0
            </coordinates>
          </LinearRing>
        </outerBoundaryIs>
      </Polygon>
    </Placemark>
  </Document>
</kml>"##;

    fn parcel() -> KmlSource {
        KmlSource::parse(PARCEL, "parcel.kml", "parcel").unwrap()
    }

    #[test]
    fn ring_is_closed_and_keeps_tokens() {
        let ring = parcel().coordinate_ring().unwrap();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.vertices()[0].lon_text(), "127.0");
        assert_eq!(ring.vertices()[4], ring.vertices()[0]);
    }

    #[test]
    fn falls_back_to_bare_coordinates() {
        let text = r#"<kml xmlns="http://www.opengis.net/kml/2.2"><Placemark><LineString>
            <coordinates>1,1 2,1 2,2 1,1</coordinates></LineString></Placemark></kml>"#;
        let ring = KmlSource::parse(text, "line.kml", "line").unwrap().coordinate_ring().unwrap();
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn missing_or_empty_coordinates_fail() {
        let none = KmlSource::parse("<kml><Placemark/></kml>", "empty.kml", "empty").unwrap();
        assert!(matches!(none.coordinate_ring(), Err(MissionError::GeometryNotFound { .. })));

        let blank = r#"<kml xmlns="http://www.opengis.net/kml/2.2"><coordinates>   </coordinates></kml>"#;
        let blank = KmlSource::parse(blank, "blank.kml", "blank").unwrap();
        assert!(matches!(blank.coordinate_ring(), Err(MissionError::GeometryNotFound { .. })));
    }

    #[test]
    fn short_tuples_are_skipped() {
        let vertices = parse_coordinate_tokens("5 1,1,0 2,1 2,2 east,north", "t").unwrap_err();
        assert!(matches!(vertices, MissionError::GeometryNotFound { .. }));
        let vertices = parse_coordinate_tokens("5 1,1,0 2,1 2,2", "t").unwrap();
        assert_eq!(vertices.len(), 3);
    }

    #[test]
    fn naming_prefers_requested_field() {
        let source = parcel();
        assert_eq!(source.naming_hint(None), "Block_7_ east");
        assert_eq!(source.naming_hint(Some("crop")), "rice");
        assert_eq!(source.naming_hint(Some("name")), "North field");
        assert_eq!(source.naming_hint(Some("OWNER")), "parcel");
        assert_eq!(source.naming_hint(Some("missing")), "parcel");
    }

    #[test]
    fn naming_ignores_namespace_when_needed() {
        let text = r#"<kml><Placemark><ExtendedData><SimpleData name="DYNM">plain</SimpleData></ExtendedData>
            <coordinates>1,1 2,1 2,2</coordinates></Placemark></kml>"#;
        let source = KmlSource::parse(text, "plain.kml", "plain").unwrap();
        assert_eq!(source.naming_hint(Some("DYNM")), "plain");
    }

    #[test]
    fn lists_field_names() {
        let names: Vec<String> = parcel().field_names().into_iter().collect();
        assert_eq!(names, vec!["DYNM", "OWNER", "crop", "name"]);
    }
}
