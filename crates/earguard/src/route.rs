//! Output route classification.
//!
//! A device counts as public or private by the `port.type` of its
//! highest-priority output route, matched against configured keywords.

use crate::graph::{Device, Route};

const PORT_TYPE_KEY: &str = "port.type";

/// The output route with the highest priority; the first one wins a tie.
pub fn highest_priority_output(routes: &[Route]) -> Option<&Route> {
    routes
        .iter()
        .filter(|r| r.direction.eq_ignore_ascii_case("output"))
        .fold(None, |best: Option<&Route>, r| match best {
            Some(b) if b.priority >= r.priority => Some(b),
            _ => Some(r),
        })
}

/// `port.type` from a route's info list. The list starts with an entry
/// count, followed by key/value pairs.
pub fn port_type(route: &Route) -> Option<&str> {
    let info = &route.info;
    if info.len() < 3 {
        return None;
    }
    info[1..]
        .chunks_exact(2)
        .find(|pair| pair[0].as_str() == Some(PORT_TYPE_KEY))
        .and_then(|pair| pair[1].as_str())
}

#[derive(Debug, Clone)]
pub struct RouteClassifier {
    public: Vec<String>,
    private: Vec<String>,
}

impl RouteClassifier {
    pub fn new<I, J>(public: I, private: J) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        J: IntoIterator,
        J::Item: AsRef<str>,
    {
        let lower = |k: &str| k.to_lowercase();
        Self {
            public: public.into_iter().map(|k| lower(k.as_ref())).collect(),
            private: private.into_iter().map(|k| lower(k.as_ref())).collect(),
        }
    }

    pub fn from_config(guard: &guardconf::GuardSection) -> Self {
        Self::new(&guard.public_ports, &guard.private_ports)
    }

    pub fn is_public(&self, device: &Device) -> bool {
        matches_keywords(device, &self.public)
    }

    pub fn is_private(&self, device: &Device) -> bool {
        matches_keywords(device, &self.private)
    }
}

impl Default for RouteClassifier {
    fn default() -> Self {
        Self::from_config(&guardconf::GuardSection::default())
    }
}

fn matches_keywords(device: &Device, keywords: &[String]) -> bool {
    let Some(port) = highest_priority_output(&device.info.params.routes).and_then(port_type) else {
        return false;
    };
    let port = port.to_lowercase();
    keywords.iter().any(|k| port.contains(k.as_str()))
}
