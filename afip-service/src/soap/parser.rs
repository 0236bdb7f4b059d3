use crate::error::AfipError;
use quick_xml::events::Event;
use quick_xml::Reader;

/// Parsed element, addressed by local name (namespace prefixes dropped).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlNode {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn named(raw: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(raw).into_owned(),
            ..Default::default()
        }
    }

    /// Parse a document and return its root element.
    pub fn parse(xml: &str) -> Result<XmlNode, AfipError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => stack.push(XmlNode::named(e.local_name().as_ref())),
                Ok(Event::Empty(e)) => {
                    attach(&mut stack, &mut root, XmlNode::named(e.local_name().as_ref()))
                }
                Ok(Event::End(_)) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| AfipError::parse("unbalanced end tag", xml))?;
                    attach(&mut stack, &mut root, node);
                }
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(|e| AfipError::parse(format!("invalid text: {}", e), xml))?;
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text);
                    }
                }
                Ok(Event::CData(c)) => {
                    if let Some(current) = stack.last_mut() {
                        current
                            .text
                            .push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(AfipError::parse(
                        format!(
                            "malformed xml at byte {}: {}",
                            reader.buffer_position(),
                            e
                        ),
                        xml,
                    ))
                }
            }
        }

        if !stack.is_empty() {
            return Err(AfipError::parse("unexpected end of document", xml));
        }
        root.ok_or_else(|| AfipError::parse("empty document", xml))
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Depth-first search for the first element with this name, self included.
    pub fn find(&self, name: &str) -> Option<&XmlNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Follow a chain of child names.
    pub fn path(&self, names: &[&str]) -> Option<&XmlNode> {
        names
            .iter()
            .try_fold(self, |node, name| node.child(name))
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    /// Non-empty text of a child, or `None`.
    pub fn child_value(&self, name: &str) -> Option<&str> {
        self.child_text(name).map(str::trim).filter(|t| !t.is_empty())
    }
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

/// `soap:Fault` contents with the code's namespace prefix stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    pub code: String,
    pub message: String,
}

impl SoapFault {
    pub fn from_envelope(root: &XmlNode) -> Option<Self> {
        let fault = root.find("Fault")?;

        let code = fault
            .child_text("faultcode")
            .or_else(|| fault.path(&["Code", "Value"]).map(|v| v.text.as_str()))
            .unwrap_or_default();
        let message = fault
            .child_text("faultstring")
            .or_else(|| fault.path(&["Reason", "Text"]).map(|t| t.text.as_str()))
            .unwrap_or_default();

        let code = code.rsplit(':').next().unwrap_or(code).trim().to_string();

        Some(Self {
            code,
            message: message.trim().to_string(),
        })
    }
}
