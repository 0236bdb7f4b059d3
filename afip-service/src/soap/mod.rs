//! SOAP plumbing shared by the WSAA, WSFE and Padron clients.
//!
//! Requests are assembled as [`XmlElement`] trees and serialized with
//! `quick-xml`, so every text node and attribute is escaped by the writer.
//! Responses are read into an [`XmlNode`] tree addressed by local name.

mod parser;
mod transport;

pub use parser::{SoapFault, XmlNode};
pub use transport::{SoapEndpoint, SoapResponse, SoapTransport};

use crate::error::AfipError;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fmt::Display;

pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// A namespace prefix bound in the envelope root.
#[derive(Debug, Clone, Copy)]
pub struct Namespace {
    pub prefix: &'static str,
    pub uri: &'static str,
}

impl Namespace {
    pub const fn new(prefix: &'static str, uri: &'static str) -> Self {
        Self { prefix, uri }
    }

    /// Element qualified with this namespace's prefix.
    pub fn element(&self, local_name: &str) -> XmlElement {
        XmlElement::new(format!("{}:{}", self.prefix, local_name))
    }

    /// Qualified element holding a single text value.
    pub fn leaf(&self, local_name: &str, value: impl Display) -> XmlElement {
        self.element(local_name).text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum XmlContent {
    Element(XmlElement),
    Text(String),
}

/// Element under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    content: Vec<XmlContent>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            content: Vec::new(),
        }
    }

    /// Unqualified element holding a single text value.
    pub fn leaf(name: impl Into<String>, value: impl Display) -> Self {
        Self::new(name).text(value.to_string())
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn child(mut self, child: XmlElement) -> Self {
        self.content.push(XmlContent::Element(child));
        self
    }

    pub fn children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = XmlElement>,
    {
        self.content
            .extend(children.into_iter().map(XmlContent::Element));
        self
    }

    /// Append the child only when present.
    pub fn optional_child(self, child: Option<XmlElement>) -> Self {
        match child {
            Some(child) => self.child(child),
            None => self,
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.content.push(XmlContent::Text(text.into()));
        self
    }

    fn write_to<W: std::io::Write>(&self, writer: &mut Writer<W>) -> Result<(), String> {
        let mut start = BytesStart::new(self.name.as_str());
        for (name, value) in &self.attributes {
            start.push_attribute((name.as_str(), value.as_str()));
        }

        if self.content.is_empty() {
            return writer
                .write_event(Event::Empty(start))
                .map_err(|e| e.to_string());
        }

        writer
            .write_event(Event::Start(start))
            .map_err(|e| e.to_string())?;
        for content in &self.content {
            match content {
                XmlContent::Element(element) => element.write_to(writer)?,
                XmlContent::Text(text) => writer
                    .write_event(Event::Text(BytesText::new(text)))
                    .map_err(|e| e.to_string())?,
            }
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .map_err(|e| e.to_string())
    }

    fn serialize(&self, declaration: bool) -> Result<String, AfipError> {
        let mut writer = Writer::new(Vec::new());
        if declaration {
            writer
                .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
                .map_err(|e| AfipError::parse(format!("xml declaration: {}", e), ""))?;
        }
        self.write_to(&mut writer)
            .map_err(|e| AfipError::parse(format!("xml serialization: {}", e), ""))?;
        String::from_utf8(writer.into_inner())
            .map_err(|e| AfipError::parse(format!("xml serialization: {}", e), ""))
    }

    /// Serialize as a fragment.
    pub fn to_xml(&self) -> Result<String, AfipError> {
        self.serialize(false)
    }

    /// Serialize as a standalone document with an XML declaration.
    pub fn to_document(&self) -> Result<String, AfipError> {
        self.serialize(true)
    }
}

/// Wrap an operation element in a SOAP 1.1 envelope binding `service`.
pub fn envelope(service: Namespace, operation: XmlElement) -> XmlElement {
    XmlElement::new("soapenv:Envelope")
        .attr("xmlns:soapenv", SOAP_ENVELOPE_NS)
        .attr(format!("xmlns:{}", service.prefix), service.uri)
        .child(XmlElement::new("soapenv:Header"))
        .child(XmlElement::new("soapenv:Body").child(operation))
}
