//! PresentationML: a minimal package writer and slide-level merging.
//!
//! Generated presentations carry one slide master, one blank layout and one
//! theme. Merged slides are re-pointed at that layout.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::engine::package::{self, resolve_target, rels_path, PackageResult, PackageWriter};
use crate::error::MergeError;

pub const EMU_PER_POINT: f32 = 12_700.0;
pub const MIN_SLIDE_EMU: i64 = 914_400;
pub const MAX_SLIDE_EMU: i64 = 51_206_400;

const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_P: &str = "http://schemas.openxmlformats.org/presentationml/2006/main";
const NS_RELS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

const REL_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const REL_SLIDE_MASTER: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideMaster";
const REL_SLIDE_LAYOUT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideLayout";
const REL_SLIDE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide";
const REL_THEME: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/theme";
const REL_IMAGE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";

const CT_PRESENTATION: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml";
const CT_SLIDE_MASTER: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.slideMaster+xml";
const CT_SLIDE_LAYOUT: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.slideLayout+xml";
const CT_SLIDE: &str = "application/vnd.openxmlformats-officedocument.presentationml.slide+xml";
const CT_THEME: &str = "application/vnd.openxmlformats-officedocument.theme+xml";

const PRESENTATION_PART: &str = "ppt/presentation.xml";
const LAYOUT_TARGET: &str = "../slideLayouts/slideLayout1.xml";

const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

const EMPTY_TREE: &str = r#"<p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr/>"#;

const THEME: &str = r#"<a:theme xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" name="Office Theme"><a:themeElements><a:clrScheme name="Office"><a:dk1><a:sysClr val="windowText" lastClr="000000"/></a:dk1><a:lt1><a:sysClr val="window" lastClr="FFFFFF"/></a:lt1><a:dk2><a:srgbClr val="44546A"/></a:dk2><a:lt2><a:srgbClr val="E7E6E6"/></a:lt2><a:accent1><a:srgbClr val="4472C4"/></a:accent1><a:accent2><a:srgbClr val="ED7D31"/></a:accent2><a:accent3><a:srgbClr val="A5A5A5"/></a:accent3><a:accent4><a:srgbClr val="FFC000"/></a:accent4><a:accent5><a:srgbClr val="5B9BD5"/></a:accent5><a:accent6><a:srgbClr val="70AD47"/></a:accent6><a:hlink><a:srgbClr val="0563C1"/></a:hlink><a:folHlink><a:srgbClr val="954F72"/></a:folHlink></a:clrScheme><a:fontScheme name="Office"><a:majorFont><a:latin typeface="Calibri Light"/><a:ea typeface=""/><a:cs typeface=""/></a:majorFont><a:minorFont><a:latin typeface="Calibri"/><a:ea typeface=""/><a:cs typeface=""/></a:minorFont></a:fontScheme><a:fmtScheme name="Office"><a:fillStyleLst><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:fillStyleLst><a:lnStyleLst><a:ln w="6350"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln><a:ln w="12700"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln><a:ln w="19050"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln></a:lnStyleLst><a:effectStyleLst><a:effectStyle><a:effectLst/></a:effectStyle><a:effectStyle><a:effectLst/></a:effectStyle><a:effectStyle><a:effectLst/></a:effectStyle></a:effectStyleLst><a:bgFillStyleLst><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:bgFillStyleLst></a:fmtScheme></a:themeElements></a:theme>"#;

/// Converts a length in points to a slide extent, clamped to what
/// PresentationML accepts.
pub fn slide_extent(points: f32) -> i64 {
    ((points * EMU_PER_POINT).round() as i64).clamp(MIN_SLIDE_EMU, MAX_SLIDE_EMU)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Relationship {
    id: String,
    rel_type: String,
    target: String,
    external: bool,
}

fn relationships_xml(rels: &[Relationship]) -> String {
    let mut xml = format!("{}<Relationships xmlns=\"{}\">", XML_DECL, NS_RELS);
    for rel in rels {
        xml.push_str(&format!(
            r#"<Relationship Id="{}" Type="{}" Target="{}"{}/>"#,
            escape(rel.id.as_str()),
            escape(rel.rel_type.as_str()),
            escape(rel.target.as_str()),
            if rel.external { r#" TargetMode="External""# } else { "" }
        ));
    }
    xml.push_str("</Relationships>");
    xml
}

/// Attributes (qualified name → unescaped value) of every element with the
/// given local name.
fn elements(xml: &[u8], local: &[u8]) -> PackageResult<Vec<HashMap<String, String>>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut found = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == local => {
                let mut attrs = HashMap::new();
                for attr in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                    let value = attr
                        .unescape_value()
                        .map(|v| v.to_string())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).to_string());
                    attrs.insert(key, value);
                }
                found.push(attrs);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parsing error: {}", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(found)
}

fn parse_relationships(xml: &[u8]) -> PackageResult<Vec<Relationship>> {
    Ok(elements(xml, b"Relationship")?
        .into_iter()
        .filter_map(|mut attrs| {
            Some(Relationship {
                id: attrs.remove("Id")?,
                rel_type: attrs.remove("Type").unwrap_or_default(),
                target: attrs.remove("Target")?,
                external: attrs.get("TargetMode").map(|m| m == "External").unwrap_or(false),
            })
        })
        .collect())
}

/// `[Content_Types].xml` contents.
#[derive(Debug, Default, Clone)]
struct ContentTypes {
    defaults: BTreeMap<String, String>,
    overrides: BTreeMap<String, String>,
}

impl ContentTypes {
    fn parse(xml: &[u8]) -> PackageResult<Self> {
        let mut types = Self::default();
        for mut attrs in elements(xml, b"Default")? {
            if let (Some(ext), Some(ct)) = (attrs.remove("Extension"), attrs.remove("ContentType")) {
                types.defaults.insert(ext.to_lowercase(), ct);
            }
        }
        for mut attrs in elements(xml, b"Override")? {
            if let (Some(part), Some(ct)) = (attrs.remove("PartName"), attrs.remove("ContentType")) {
                types.overrides.insert(part.trim_start_matches('/').to_string(), ct);
            }
        }
        Ok(types)
    }

    /// Content type of `part` as declared by this package.
    fn lookup(&self, part: &str) -> Option<(&str, bool)> {
        if let Some(ct) = self.overrides.get(part) {
            return Some((ct.as_str(), true));
        }
        let ext = part.rsplit_once('.')?.1.to_lowercase();
        self.defaults.get(&ext).map(|ct| (ct.as_str(), false))
    }

    fn to_xml(&self) -> String {
        let mut xml = format!(
            r#"{}<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
            XML_DECL
        );
        for (ext, ct) in &self.defaults {
            xml.push_str(&format!(
                r#"<Default Extension="{}" ContentType="{}"/>"#,
                escape(ext.as_str()),
                escape(ct.as_str())
            ));
        }
        for (part, ct) in &self.overrides {
            xml.push_str(&format!(
                r#"<Override PartName="/{}" ContentType="{}"/>"#,
                escape(part.as_str()),
                escape(ct.as_str())
            ));
        }
        xml.push_str("</Types>");
        xml
    }
}

struct Slide {
    xml: Vec<u8>,
    rels: Vec<Relationship>,
}

/// Accumulates slides and parts, then writes a complete package.
pub(crate) struct PresentationBuilder {
    width: i64,
    height: i64,
    slides: Vec<Slide>,
    parts: Vec<(String, Vec<u8>)>,
    content_types: ContentTypes,
}

impl PresentationBuilder {
    /// Slide size in EMU; values are clamped to the valid range.
    pub fn new(width: i64, height: i64) -> Self {
        let mut content_types = ContentTypes::default();
        content_types.defaults.insert(
            "rels".to_string(),
            "application/vnd.openxmlformats-package.relationships+xml".to_string(),
        );
        content_types
            .defaults
            .insert("xml".to_string(), "application/xml".to_string());
        content_types
            .defaults
            .insert("png".to_string(), "image/png".to_string());
        for (part, ct) in [
            (PRESENTATION_PART, CT_PRESENTATION),
            ("ppt/slideMasters/slideMaster1.xml", CT_SLIDE_MASTER),
            ("ppt/slideLayouts/slideLayout1.xml", CT_SLIDE_LAYOUT),
            ("ppt/theme/theme1.xml", CT_THEME),
        ] {
            content_types.overrides.insert(part.to_string(), ct.to_string());
        }

        Self {
            width: width.clamp(MIN_SLIDE_EMU, MAX_SLIDE_EMU),
            height: height.clamp(MIN_SLIDE_EMU, MAX_SLIDE_EMU),
            slides: Vec::new(),
            parts: Vec::new(),
            content_types,
        }
    }

    pub fn slide_count(&self) -> usize {
        self.slides.len()
    }

    /// Appends a slide showing `png` stretched over the whole slide.
    pub fn add_picture_slide(&mut self, png: Vec<u8>) {
        let number = self.slides.len() + 1;
        let media = format!("ppt/media/image{}.png", number);
        let xml = format!(
            r#"{decl}<p:sld xmlns:a="{a}" xmlns:r="{r}" xmlns:p="{p}"><p:cSld><p:spTree>{tree}<p:pic><p:nvPicPr><p:cNvPr id="2" name="Page {n}"/><p:cNvPicPr><a:picLocks noChangeAspect="1"/></p:cNvPicPr><p:nvPr/></p:nvPicPr><p:blipFill><a:blip r:embed="rId2"/><a:stretch><a:fillRect/></a:stretch></p:blipFill><p:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom></p:spPr></p:pic></p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sld>"#,
            decl = XML_DECL,
            a = NS_A,
            r = NS_R,
            p = NS_P,
            tree = EMPTY_TREE,
            n = number,
            cx = self.width,
            cy = self.height,
        );
        let rels = vec![
            Relationship {
                id: "rId1".to_string(),
                rel_type: REL_SLIDE_LAYOUT.to_string(),
                target: LAYOUT_TARGET.to_string(),
                external: false,
            },
            Relationship {
                id: "rId2".to_string(),
                rel_type: REL_IMAGE.to_string(),
                target: format!("../media/image{}.png", number),
                external: false,
            },
        ];
        self.parts.push((media, png));
        self.slides.push(Slide {
            xml: xml.into_bytes(),
            rels,
        });
    }

    fn add_slide(&mut self, xml: Vec<u8>, rels: Vec<Relationship>) {
        self.slides.push(Slide { xml, rels });
    }

    fn add_part(&mut self, name: String, bytes: Vec<u8>) {
        self.parts.push((name, bytes));
    }

    fn presentation_xml(&self) -> String {
        let mut slide_ids = String::new();
        for index in 0..self.slides.len() {
            slide_ids.push_str(&format!(
                r#"<p:sldId id="{}" r:id="rId{}"/>"#,
                256 + index,
                3 + index
            ));
        }
        let slide_list = if slide_ids.is_empty() {
            String::new()
        } else {
            format!("<p:sldIdLst>{}</p:sldIdLst>", slide_ids)
        };
        format!(
            r#"{}<p:presentation xmlns:a="{}" xmlns:r="{}" xmlns:p="{}"><p:sldMasterIdLst><p:sldMasterId id="2147483648" r:id="rId1"/></p:sldMasterIdLst>{}<p:sldSz cx="{}" cy="{}"/><p:notesSz cx="6858000" cy="9144000"/></p:presentation>"#,
            XML_DECL, NS_A, NS_R, NS_P, slide_list, self.width, self.height
        )
    }

    fn presentation_rels(&self) -> Vec<Relationship> {
        let mut rels = vec![
            Relationship {
                id: "rId1".to_string(),
                rel_type: REL_SLIDE_MASTER.to_string(),
                target: "slideMasters/slideMaster1.xml".to_string(),
                external: false,
            },
            Relationship {
                id: "rId2".to_string(),
                rel_type: REL_THEME.to_string(),
                target: "theme/theme1.xml".to_string(),
                external: false,
            },
        ];
        for index in 0..self.slides.len() {
            rels.push(Relationship {
                id: format!("rId{}", 3 + index),
                rel_type: REL_SLIDE.to_string(),
                target: format!("slides/slide{}.xml", index + 1),
                external: false,
            });
        }
        rels
    }

    pub fn write(mut self, output: &Path) -> PackageResult<()> {
        for index in 0..self.slides.len() {
            self.content_types.overrides.insert(
                format!("ppt/slides/slide{}.xml", index + 1),
                CT_SLIDE.to_string(),
            );
        }

        let master = format!(
            r#"{}<p:sldMaster xmlns:a="{}" xmlns:r="{}" xmlns:p="{}"><p:cSld><p:spTree>{}</p:spTree></p:cSld><p:clrMap bg1="lt1" tx1="dk1" bg2="lt2" tx2="dk2" accent1="accent1" accent2="accent2" accent3="accent3" accent4="accent4" accent5="accent5" accent6="accent6" hlink="hlink" folHlink="folHlink"/><p:sldLayoutIdLst><p:sldLayoutId id="2147483649" r:id="rId1"/></p:sldLayoutIdLst></p:sldMaster>"#,
            XML_DECL, NS_A, NS_R, NS_P, EMPTY_TREE
        );
        let layout = format!(
            r#"{}<p:sldLayout xmlns:a="{}" xmlns:r="{}" xmlns:p="{}" type="blank" preserve="1"><p:cSld name="Blank"><p:spTree>{}</p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sldLayout>"#,
            XML_DECL, NS_A, NS_R, NS_P, EMPTY_TREE
        );
        let master_rels = [
            Relationship {
                id: "rId1".to_string(),
                rel_type: REL_SLIDE_LAYOUT.to_string(),
                target: LAYOUT_TARGET.to_string(),
                external: false,
            },
            Relationship {
                id: "rId2".to_string(),
                rel_type: REL_THEME.to_string(),
                target: "../theme/theme1.xml".to_string(),
                external: false,
            },
        ];
        let layout_rels = [Relationship {
            id: "rId1".to_string(),
            rel_type: REL_SLIDE_MASTER.to_string(),
            target: "../slideMasters/slideMaster1.xml".to_string(),
            external: false,
        }];
        let package_rels = [Relationship {
            id: "rId1".to_string(),
            rel_type: REL_OFFICE_DOCUMENT.to_string(),
            target: PRESENTATION_PART.to_string(),
            external: false,
        }];

        let mut writer = PackageWriter::create(output)?;
        writer.add("[Content_Types].xml", self.content_types.to_xml().as_bytes())?;
        writer.add("_rels/.rels", relationships_xml(&package_rels).as_bytes())?;
        writer.add(PRESENTATION_PART, self.presentation_xml().as_bytes())?;
        writer.add(
            &rels_path(PRESENTATION_PART),
            relationships_xml(&self.presentation_rels()).as_bytes(),
        )?;
        writer.add("ppt/slideMasters/slideMaster1.xml", master.as_bytes())?;
        writer.add(
            "ppt/slideMasters/_rels/slideMaster1.xml.rels",
            relationships_xml(&master_rels).as_bytes(),
        )?;
        writer.add("ppt/slideLayouts/slideLayout1.xml", layout.as_bytes())?;
        writer.add(
            "ppt/slideLayouts/_rels/slideLayout1.xml.rels",
            relationships_xml(&layout_rels).as_bytes(),
        )?;
        writer.add(
            "ppt/theme/theme1.xml",
            format!("{}{}", XML_DECL, THEME).as_bytes(),
        )?;
        for (index, slide) in self.slides.iter().enumerate() {
            let part = format!("ppt/slides/slide{}.xml", index + 1);
            writer.add(&part, &slide.xml)?;
            writer.add(&rels_path(&part), relationships_xml(&slide.rels).as_bytes())?;
        }
        for (name, bytes) in &self.parts {
            writer.add(name, bytes)?;
        }
        writer.finish()
    }
}

/// Slide size in EMU declared by a presentation package.
fn slide_size(presentation: &[u8]) -> PackageResult<Option<(i64, i64)>> {
    Ok(elements(presentation, b"sldSz")?.into_iter().next().and_then(|attrs| {
        let cx = attrs.get("cx")?.parse().ok()?;
        let cy = attrs.get("cy")?.parse().ok()?;
        Some((cx, cy))
    }))
}

/// Slide parts of a presentation in `sldIdLst` order.
fn slide_parts(presentation: &[u8], rels: &[Relationship]) -> PackageResult<Vec<String>> {
    let targets: HashMap<&str, &str> = rels
        .iter()
        .map(|r| (r.id.as_str(), r.target.as_str()))
        .collect();
    let mut parts = Vec::new();
    for attrs in elements(presentation, b"sldId")? {
        let rel_id = attrs
            .iter()
            .find(|(k, _)| k.ends_with(":id"))
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| "Slide entry without relationship id".to_string())?;
        let target = targets
            .get(rel_id)
            .ok_or_else(|| format!("Slide relationship '{}' is missing", rel_id))?;
        parts.push(resolve_target(PRESENTATION_PART, target));
    }
    Ok(parts)
}

/// Target of a part under `ppt/`, relative to `ppt/slides/`.
fn slide_relative_target(part: &str) -> String {
    match part.strip_prefix("ppt/") {
        Some(rest) => format!("../{}", rest),
        None => format!("/{}", part),
    }
}

/// Unique name for a copied part: the input index goes into the file name.
fn copied_part_name(part: &str, input_index: usize) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/m{}_{}", dir, input_index, file),
        None => format!("m{}_{}", input_index, part),
    }
}

fn append_presentation(
    builder: &mut PresentationBuilder,
    path: &Path,
    input_index: usize,
) -> PackageResult<()> {
    let mut archive = package::open(path)?;
    let presentation = package::read_bytes(&mut archive, PRESENTATION_PART)?;
    let presentation_rels =
        parse_relationships(&package::read_bytes(&mut archive, &rels_path(PRESENTATION_PART))?)?;
    let types = ContentTypes::parse(&package::read_bytes(&mut archive, "[Content_Types].xml")?)?;

    let mut copied: HashMap<String, String> = HashMap::new();
    for slide_part in slide_parts(&presentation, &presentation_rels)? {
        let xml = package::read_bytes(&mut archive, &slide_part)?;
        let rels_part = rels_path(&slide_part);
        let rels = if package::has_part(&archive, &rels_part) {
            parse_relationships(&package::read_bytes(&mut archive, &rels_part)?)?
        } else {
            Vec::new()
        };

        let mut new_rels = Vec::with_capacity(rels.len());
        for rel in rels {
            if rel.external {
                new_rels.push(rel);
            } else if rel.rel_type.ends_with("/slideLayout") {
                new_rels.push(Relationship {
                    target: LAYOUT_TARGET.to_string(),
                    ..rel
                });
            } else if rel.rel_type.ends_with("/notesSlide") {
                continue;
            } else {
                let source = resolve_target(&slide_part, &rel.target);
                let new_name = match copied.get(&source) {
                    Some(name) => name.clone(),
                    None => {
                        if !package::has_part(&archive, &source) {
                            tracing::warn!(part = %source, "Dropping relationship to missing part");
                            continue;
                        }
                        let bytes = package::read_bytes(&mut archive, &source)?;
                        let name = copied_part_name(&source, input_index);
                        match types.lookup(&source) {
                            Some((ct, true)) => {
                                builder.content_types.overrides.insert(name.clone(), ct.to_string());
                            }
                            Some((ct, false)) => {
                                if let Some(ext) = source.rsplit_once('.').map(|(_, e)| e.to_lowercase()) {
                                    builder
                                        .content_types
                                        .defaults
                                        .entry(ext)
                                        .or_insert_with(|| ct.to_string());
                                }
                            }
                            None => {}
                        }
                        builder.add_part(name.clone(), bytes);
                        copied.insert(source, name.clone());
                        name
                    }
                };
                new_rels.push(Relationship {
                    target: slide_relative_target(&new_name),
                    ..rel
                });
            }
        }

        builder.add_slide(xml, new_rels);
    }
    Ok(())
}

/// Appends every slide of every input, in order, to a fresh presentation
/// sized like the first input.
pub fn merge_pptx<P: AsRef<Path>>(inputs: &[P], output: &Path) -> Result<(), MergeError> {
    let _span = tracing::info_span!("engine.merge_pptx", inputs = inputs.len()).entered();

    let run = || -> PackageResult<()> {
        let first = inputs
            .first()
            .ok_or_else(|| "No presentations to merge".to_string())?;
        let mut archive = package::open(first.as_ref())?;
        let (width, height) = slide_size(&package::read_bytes(&mut archive, PRESENTATION_PART)?)?
            .unwrap_or((12_192_000, 6_858_000));

        let mut builder = PresentationBuilder::new(width, height);
        for (index, input) in inputs.iter().enumerate() {
            append_presentation(&mut builder, input.as_ref(), index + 1)?;
        }
        tracing::debug!(slides = builder.slide_count(), "Merged presentation assembled");
        builder.write(output)
    };

    run().map_err(MergeError::MergeFailure)
}
