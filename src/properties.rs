use std::collections::{BTreeMap, HashMap};
use std::fmt;

use thistermination::TerminationFull;
use zvariant::Value;

pub type Getter = Box<dyn Fn() -> Value<'static> + Send + Sync>;

/// A single property: either a fixed value or a getter evaluated on every read.
pub enum PropertyEntry {
    Static(Value<'static>),
    Dynamic(Getter),
}

impl PropertyEntry {
    pub fn fixed(value: impl Into<Value<'static>>) -> Self {
        PropertyEntry::Static(value.into())
    }

    pub fn dynamic<F>(getter: F) -> Self
    where
        F: Fn() -> Value<'static> + Send + Sync + 'static,
    {
        PropertyEntry::Dynamic(Box::new(getter))
    }

    fn read(&self) -> Result<Value<'static>, PropertyError> {
        match self {
            PropertyEntry::Static(value) => value
                .try_clone()
                .map_err(|e| PropertyError::Encoding(e.to_string())),
            PropertyEntry::Dynamic(getter) => Ok(getter()),
        }
    }
}

impl fmt::Debug for PropertyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyEntry::Static(value) => f.debug_tuple("Static").field(value).finish(),
            PropertyEntry::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

#[derive(TerminationFull, Clone, PartialEq, Eq)]
pub enum PropertyError {
    #[termination(msg("interface {0} not found"))]
    UnknownInterface(String),
    #[termination(msg("property {0} not found"))]
    UnknownProperty(String),
    #[termination(msg("property {0} is not writable"))]
    NotWritable(String),
    #[termination(msg("property value could not be encoded: {0}"))]
    Encoding(String),
}

impl From<PropertyError> for zbus::fdo::Error {
    fn from(err: PropertyError) -> Self {
        let msg = err.to_string();
        match err {
            PropertyError::UnknownInterface(_) => zbus::fdo::Error::UnknownInterface(msg),
            PropertyError::UnknownProperty(_) => zbus::fdo::Error::UnknownProperty(msg),
            PropertyError::NotWritable(_) => zbus::fdo::Error::PropertyReadOnly(msg),
            PropertyError::Encoding(_) => zbus::fdo::Error::Failed(msg),
        }
    }
}

/// Property table keyed by (interface name, property name).
#[derive(Debug, Default)]
pub struct PropertyRegistry {
    interfaces: HashMap<String, BTreeMap<String, PropertyEntry>>,
}

impl PropertyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a property.
    pub fn register(&mut self, interface: &str, property: &str, entry: PropertyEntry) {
        self.interfaces
            .entry(interface.to_string())
            .or_default()
            .insert(property.to_string(), entry);
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with(mut self, interface: &str, property: &str, entry: PropertyEntry) -> Self {
        self.register(interface, property, entry);
        self
    }

    pub fn get(&self, interface: &str, property: &str) -> Result<Value<'static>, PropertyError> {
        self.interfaces
            .get(interface)
            .ok_or_else(|| PropertyError::UnknownInterface(interface.to_string()))?
            .get(property)
            .ok_or_else(|| PropertyError::UnknownProperty(property.to_string()))?
            .read()
    }

    pub fn get_all(&self, interface: &str) -> Result<HashMap<String, Value<'static>>, PropertyError> {
        let properties = self
            .interfaces
            .get(interface)
            .ok_or_else(|| PropertyError::UnknownInterface(interface.to_string()))?;
        properties
            .iter()
            .map(|(name, entry)| Ok((name.clone(), entry.read()?)))
            .collect()
    }

    /// Every property is read-only from the bus, so this always fails.
    pub fn set(&self, _interface: &str, property: &str, _value: Value<'_>) -> Result<(), PropertyError> {
        Err(PropertyError::NotWritable(property.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const IFACE: &str = "org.example.Item";

    fn registry(flag: Arc<AtomicBool>) -> PropertyRegistry {
        PropertyRegistry::new()
            .with(IFACE, "Title", PropertyEntry::fixed("Twingate"))
            .with(IFACE, "ItemIsMenu", PropertyEntry::fixed(true))
            .with(
                IFACE,
                "Description",
                PropertyEntry::dynamic(move || {
                    if flag.load(Ordering::SeqCst) {
                        Value::from("on")
                    } else {
                        Value::from("off")
                    }
                }),
            )
    }

    #[test]
    fn test_static_value() {
        let registry = registry(Arc::default());
        assert_eq!(registry.get(IFACE, "Title"), Ok(Value::from("Twingate")));
        assert_eq!(registry.get(IFACE, "ItemIsMenu"), Ok(Value::from(true)));
    }

    #[test]
    fn test_dynamic_value_follows_getter() {
        let flag = Arc::new(AtomicBool::new(false));
        let registry = registry(Arc::clone(&flag));
        assert_eq!(registry.get(IFACE, "Description"), Ok(Value::from("off")));
        flag.store(true, Ordering::SeqCst);
        assert_eq!(registry.get(IFACE, "Description"), Ok(Value::from("on")));
    }

    #[test]
    fn test_get_all() {
        let registry = registry(Arc::default());
        let all = registry.get_all(IFACE).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all["Title"], Value::from("Twingate"));
        assert_eq!(all["Description"], Value::from("off"));
    }

    #[test]
    fn test_unknown_lookups() {
        let registry = registry(Arc::default());
        assert_eq!(
            registry.get("org.example.Missing", "Title"),
            Err(PropertyError::UnknownInterface("org.example.Missing".into()))
        );
        assert_eq!(
            registry.get(IFACE, "Missing"),
            Err(PropertyError::UnknownProperty("Missing".into()))
        );
        assert!(registry.get_all("org.example.Missing").is_err());
    }

    #[test]
    fn test_set_is_rejected() {
        let registry = registry(Arc::default());
        assert_eq!(
            registry.set(IFACE, "Title", Value::from("other")),
            Err(PropertyError::NotWritable("Title".into()))
        );
        // even for properties nobody registered
        assert!(matches!(
            registry.set(IFACE, "Nope", Value::from(1u32)),
            Err(PropertyError::NotWritable(_))
        ));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            PropertyError::UnknownInterface("org.example.Missing".into()).to_string(),
            "interface org.example.Missing not found"
        );
        assert_eq!(
            PropertyError::NotWritable("Title".into()).to_string(),
            "property Title is not writable"
        );
        let fault: zbus::fdo::Error = PropertyError::UnknownProperty("Nope".into()).into();
        assert!(matches!(
            fault,
            zbus::fdo::Error::UnknownProperty(msg) if msg == "property Nope not found"
        ));
    }

    #[test]
    fn test_fault_mapping() {
        let fault: zbus::fdo::Error = PropertyError::NotWritable("Title".into()).into();
        assert!(matches!(fault, zbus::fdo::Error::PropertyReadOnly(_)));
        let fault: zbus::fdo::Error = PropertyError::UnknownProperty("X".into()).into();
        assert!(matches!(fault, zbus::fdo::Error::UnknownProperty(_)));
    }
}
