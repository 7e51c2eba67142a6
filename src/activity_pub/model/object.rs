//! Read only view over Activity Streams JSON documents.

use std::borrow::Cow;
use std::fmt::Display;

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Object<'a>(Cow<'a, Value>);

impl Object<'_> {
    pub(crate) fn id(&self) -> Option<&str> {
        self.get_str("id").or_else(|| self.get_str("@id"))
    }
    pub(crate) fn type_is(&self, ty: &str) -> bool {
        self.get_first_type().is_some_and(|t| t == ty)
    }
    pub(crate) fn get_first_type(&self) -> Option<&str> {
        for prop in ["type", "@type"] {
            if let Some(Value::String(object_type)) = self.0.get(prop) {
                return Some(object_type.as_str());
            }
            if let Some(Value::Array(type_array)) = self.0.get(prop) {
                return type_array.iter().find_map(Value::as_str);
            }
        }
        None
    }
    pub(crate) fn get_str(&self, prop: &str) -> Option<&str> {
        self.0.get(prop).and_then(Value::as_str)
    }
    pub(crate) fn get_value(&self, prop: &str) -> Option<&Value> {
        self.0.get(prop)
    }
    /// A property holding either one IRI or an array of IRIs (embedded
    /// nodes contribute their id).
    pub(crate) fn get_iri_array(&self, prop: &str) -> Vec<&str> {
        iri_array(self.0.get(prop))
    }
    pub(crate) fn get_node_object(&self, prop: &str) -> Option<Object<'_>> {
        self.0.get(prop).filter(|v| v.is_object()).map(Object::from)
    }
    pub(crate) fn get_node_iri(&self, prop: &str) -> Option<&str> {
        if let Some(v) = self.0.get(prop) {
            if v.is_string() {
                return v.as_str();
            }
            if v.is_object() {
                return v.get("id").and_then(Value::as_str);
            }
            // As shown in
            // https://www.w3.org/TR/activitystreams-vocabulary/#properties, a
            // node reference might be an array. We just use the first IRI.
            if let Some(array) = v.as_array() {
                return array.iter().find_map(Value::as_str);
            }
        }
        None
    }
    pub(crate) fn get_endpoint(&self, prop: &str) -> Option<&str> {
        self.0
            .get("endpoints")
            .and_then(|endpoints| endpoints.get(prop))
            .and_then(Value::as_str)
    }
    /// Items of an embedded collection or collection page.
    pub(crate) fn get_collection_items(&self, prop: &str) -> Vec<&str> {
        let Some(collection) = self.0.get(prop).filter(|v| v.is_object()) else {
            return vec![];
        };
        let items = iri_array(collection.get("orderedItems"));
        if items.is_empty() {
            return iri_array(collection.get("items"));
        }
        items
    }
    pub(crate) fn to_value(&self) -> Value {
        self.0.clone().into_owned()
    }
}

fn iri_array(value: Option<&Value>) -> Vec<&str> {
    match value {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Object(map)) => map.get("id").and_then(Value::as_str).into_iter().collect(),
        Some(Value::Array(array)) => array
            .iter()
            .filter_map(|v| v.as_str().or_else(|| v.get("id").and_then(Value::as_str)))
            .collect(),
        _ => vec![],
    }
}

impl From<Value> for Object<'static> {
    fn from(value: Value) -> Self {
        if !value.is_object() {
            // XXX: it is an error to create an Object from anything but a JSON
            // object. It should be validated by upper layers. In case some slip
            // through, we will just replace them with an empty object.
            Object(Cow::Owned(Value::Object(Map::new())))
        } else {
            Object(Cow::Owned(value))
        }
    }
}

impl<'a> From<&'a Value> for Object<'a> {
    fn from(value: &'a Value) -> Self {
        if !value.is_object() {
            Object(Cow::Owned(Value::Object(Map::new())))
        } else {
            Object(Cow::Borrowed(value))
        }
    }
}

impl From<Object<'_>> for Value {
    fn from(value: Object) -> Self {
        value.0.into_owned()
    }
}

impl Display for Object<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Object;

    #[test]
    fn node_references() {
        let object = Object::from(json!({
            "type": ["Video", "Document"],
            "attributedTo": [
                {"type": "Person", "id": "https://peer.example/accounts/root"},
                "https://peer.example/video-channels/main"
            ],
            "actor": {"id": "https://peer.example/accounts/root"},
            "likes": {
                "type": "OrderedCollection",
                "orderedItems": ["https://a.example/accounts/x", "https://b.example/accounts/y"]
            }
        }));
        assert!(object.type_is("Video"));
        assert_eq!(
            object.get_iri_array("attributedTo"),
            vec![
                "https://peer.example/accounts/root",
                "https://peer.example/video-channels/main"
            ]
        );
        assert_eq!(
            object.get_node_iri("actor"),
            Some("https://peer.example/accounts/root")
        );
        assert_eq!(object.get_collection_items("likes").len(), 2);
        assert!(object.get_collection_items("shares").is_empty());
    }

    #[test]
    fn non_objects_become_empty() {
        let object = Object::from(json!("https://peer.example/video/7"));
        assert_eq!(object.id(), None);
        assert_eq!(object.to_value(), json!({}));
    }
}
