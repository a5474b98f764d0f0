//! Reads model documents.
//!
//! ```xml
//! <model target="chl-gradient">
//!   <distribution name="scaled" scale="0.01" offset="0" log="false"/>
//!   <descriptor name="sst" layer="SST" band="0" dt="0"/>
//!   <descriptor name="chl" layer="CHL" dt="-5" distribution="log"/>
//!   <descriptor name="wind" layer="QuikSCAT"/>
//!   <term coefficient="2.5"><factor ref="sst"/><factor ref="chl"/></term>
//!   <term coefficient="-1"/>
//!   <substitution ref="sst">
//!     <term coefficient="0.5"><factor ref="wind"/></term>
//!     <term coefficient="12"/>
//!   </substitution>
//! </model>
//! ```
//!
//! Distributions and descriptors must be declared before they are referenced.
//! Substitutions are applied once every term has been read, in document order.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::descriptor::CoverageDescriptor;
use crate::error::{ModelError, Result};
use crate::model::{CoverageModel, Model};
use crate::normalization::Distribution;
use crate::term::Term;

/// A parsed document: the model and every descriptor it declares, including
/// the ones its substitutions eliminated and the ones no term uses.
#[derive(Debug, Clone)]
pub struct ModelDocument {
    pub model: CoverageModel,
    /// Sorted like [`Model::descriptors`].
    pub descriptors: Vec<CoverageDescriptor>,
}

pub fn load_model(path: &Path) -> Result<CoverageModel> {
    load_document(path).map(|document| document.model)
}

pub fn parse_model_str(xml: &str) -> Result<CoverageModel> {
    parse_model(xml.as_bytes())
}

pub fn parse_model<R: BufRead>(reader: R) -> Result<CoverageModel> {
    parse_document(reader).map(|document| document.model)
}

pub fn load_document(path: &Path) -> Result<ModelDocument> {
    let file = File::open(path)?;
    let document = parse_document(BufReader::new(file))?;
    info!("Loaded model {:?} from {:?}", document.model.target(), path);
    Ok(document)
}

pub fn parse_document<R: BufRead>(reader: R) -> Result<ModelDocument> {
    let mut reader = Reader::from_reader(reader);
    reader.config_mut().trim_text(true);

    let mut builder = DocumentBuilder::default();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => builder.open(&Element::read(&e)?, false)?,
            Event::Empty(e) => builder.open(&Element::read(&e)?, true)?,
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                builder.close(&name)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    builder.finish()
}

struct Element {
    name: String,
    attributes: HashMap<String, String>,
}

impl Element {
    fn read(e: &BytesStart) -> Result<Self> {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        let mut attributes = HashMap::new();
        for attr in e.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            attributes.insert(key, attr.unescape_value()?.into_owned());
        }
        Ok(Self { name, attributes })
    }

    fn required(&self, attribute: &str) -> Result<&str> {
        self.attributes
            .get(attribute)
            .map(String::as_str)
            .ok_or_else(|| ModelError::MissingAttribute {
                element: self.name.clone(),
                attribute: attribute.to_string(),
            })
    }

    fn parse_or<V: FromStr>(&self, attribute: &str, default: V) -> Result<V> {
        match self.attributes.get(attribute) {
            Some(value) => parse_value(attribute, value),
            None => Ok(default),
        }
    }
}

fn parse_value<V: FromStr>(attribute: &str, value: &str) -> Result<V> {
    value.trim().parse().map_err(|_| ModelError::InvalidValue {
        attribute: attribute.to_string(),
        value: value.to_string(),
    })
}

#[derive(Default)]
struct DocumentBuilder {
    target: Option<String>,
    distributions: HashMap<String, Distribution>,
    descriptors: HashMap<String, CoverageDescriptor>,
    terms: Vec<Term<CoverageDescriptor>>,
    substitutions: Vec<(CoverageDescriptor, Vec<Term<CoverageDescriptor>>)>,
    term: Option<Term<CoverageDescriptor>>,
    substitution: Option<(CoverageDescriptor, Vec<Term<CoverageDescriptor>>)>,
}

impl DocumentBuilder {
    fn open(&mut self, element: &Element, empty: bool) -> Result<()> {
        if matches!(element.name.as_str(), "model" | "distribution" | "descriptor")
            && (self.term.is_some() || self.substitution.is_some())
        {
            return Err(ModelError::Malformed(format!(
                "<{}> inside a <term> or <substitution>",
                element.name
            )));
        }
        match element.name.as_str() {
            "model" => {
                if self.target.is_some() {
                    return Err(ModelError::Malformed(
                        "more than one <model> element".to_string(),
                    ));
                }
                self.target = Some(element.required("target")?.to_string());
            }
            "distribution" => {
                let name = element.required("name")?;
                if Distribution::by_name(name).is_some() || self.distributions.contains_key(name) {
                    return Err(ModelError::DuplicateName(name.to_string()));
                }
                let distribution = Distribution::new(
                    name,
                    element.parse_or("scale", 1.0)?,
                    element.parse_or("offset", 0.0)?,
                    element.parse_or("log", false)?,
                );
                self.distributions.insert(name.to_string(), distribution);
            }
            "descriptor" => {
                let name = element.required("name")?;
                if self.descriptors.contains_key(name) {
                    return Err(ModelError::DuplicateName(name.to_string()));
                }
                let layer = element.attributes.get("layer").map_or(name, String::as_str);
                let distribution = match element.attributes.get("distribution") {
                    Some(reference) => self.distribution(reference)?,
                    None => Distribution::normal(),
                };
                let descriptor = CoverageDescriptor::new(name, layer)
                    .with_band(element.parse_or("band", 0)?)
                    .with_time_offset(element.parse_or("dt", 0)?)
                    .with_distribution(distribution);
                self.descriptors.insert(name.to_string(), descriptor);
            }
            "term" => {
                if self.term.is_some() {
                    return Err(ModelError::Malformed("nested <term> element".to_string()));
                }
                let coefficient = parse_value("coefficient", element.required("coefficient")?)?;
                self.term = Some(Term::constant(coefficient));
                if empty {
                    self.close("term")?;
                }
            }
            "factor" => {
                let descriptor = self.descriptor(element.required("ref")?)?;
                match self.term.as_mut() {
                    Some(term) => term.descriptors.push(descriptor),
                    None => {
                        return Err(ModelError::Malformed(
                            "<factor> outside of a <term>".to_string(),
                        ))
                    }
                }
            }
            "substitution" => {
                if self.substitution.is_some() || self.term.is_some() {
                    return Err(ModelError::Malformed(
                        "misplaced <substitution> element".to_string(),
                    ));
                }
                let descriptor = self.descriptor(element.required("ref")?)?;
                self.substitution = Some((descriptor, Vec::new()));
                if empty {
                    self.close("substitution")?;
                }
            }
            other => debug!("Ignoring <{}> element", other),
        }
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<()> {
        match name {
            "term" => {
                if let Some(term) = self.term.take() {
                    match self.substitution.as_mut() {
                        Some((_, expansion)) => expansion.push(term),
                        None => self.terms.push(term),
                    }
                }
            }
            "substitution" => {
                if let Some(substitution) = self.substitution.take() {
                    self.substitutions.push(substitution);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn distribution(&self, name: &str) -> Result<Distribution> {
        self.distributions
            .get(name)
            .cloned()
            .or_else(|| Distribution::by_name(name))
            .ok_or_else(|| ModelError::UnknownDistribution(name.to_string()))
    }

    fn descriptor(&self, name: &str) -> Result<CoverageDescriptor> {
        self.descriptors
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownDescriptor(name.to_string()))
    }

    fn finish(self) -> Result<ModelDocument> {
        let target = self
            .target
            .ok_or_else(|| ModelError::Malformed("missing <model> element".to_string()))?;

        let mut model = Model::new(target, self.terms);
        for (descriptor, expansion) in &self.substitutions {
            let count = model.substitute(descriptor, expansion)?;
            debug!("Substituted {} ({} products)", descriptor, count);
        }
        debug!(
            "Parsed model {:?}: {} terms, {} descriptors",
            model.target(),
            model.terms().len(),
            model.descriptors().len()
        );

        let mut descriptors: Vec<CoverageDescriptor> = self.descriptors.into_values().collect();
        descriptors.sort();
        Ok(ModelDocument { model, descriptors })
    }
}
