use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::fdo::{self, RequestNameFlags, RequestNameReply};
use zbus::message::{Body, Header, Type as MessageType};
use zbus::names::BusName;
use zbus::{proxy, Connection, Message, MessageStream};
use zvariant::{ObjectPath, OwnedValue, Structure, Type, Value};

use crate::error::TrayError;
use crate::menu::LayoutNode;
use crate::properties::PropertyRegistry;
use crate::tray::{SignalReceiver, StatusTray, TraySignal};

pub const ITEM_PATH: &str = "/StatusNotifierItem";
pub const MENU_PATH: &str = "/MenuBar";
pub const ITEM_INTERFACE: &str = "org.kde.StatusNotifierItem";
pub const MENU_INTERFACE: &str = "com.canonical.dbusmenu";

const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";
const PEER_INTERFACE: &str = "org.freedesktop.DBus.Peer";

/// Well-known name requested by the process with the given pid.
pub fn bus_name_for(pid: u32) -> String {
    format!("org.kde.StatusNotifierItem-{pid}-1")
}

#[proxy(
    interface = "org.kde.StatusNotifierWatcher",
    default_service = "org.kde.StatusNotifierWatcher",
    default_path = "/StatusNotifierWatcher",
    gen_blocking = false
)]
trait StatusNotifierWatcher {
    fn register_status_notifier_item(&self, service: &str) -> zbus::Result<()>;
}

const PROPERTIES_XML: &str = r#"  <interface name="org.freedesktop.DBus.Properties">
    <method name="Get">
      <arg name="interface" type="s" direction="in"/>
      <arg name="property" type="s" direction="in"/>
      <arg name="value" type="v" direction="out"/>
    </method>
    <method name="GetAll">
      <arg name="interface" type="s" direction="in"/>
      <arg name="properties" type="a{sv}" direction="out"/>
    </method>
    <method name="Set">
      <arg name="interface" type="s" direction="in"/>
      <arg name="property" type="s" direction="in"/>
      <arg name="value" type="v" direction="in"/>
    </method>
  </interface>
  <interface name="org.freedesktop.DBus.Introspectable">
    <method name="Introspect">
      <arg name="xml_data" type="s" direction="out"/>
    </method>
  </interface>
  <interface name="org.freedesktop.DBus.Peer">
    <method name="Ping"/>
  </interface>
"#;

const ITEM_XML: &str = r#"  <interface name="org.kde.StatusNotifierItem">
    <method name="Activate">
      <arg name="x" type="i" direction="in"/>
      <arg name="y" type="i" direction="in"/>
    </method>
    <method name="SecondaryActivate">
      <arg name="x" type="i" direction="in"/>
      <arg name="y" type="i" direction="in"/>
    </method>
    <method name="ContextMenu">
      <arg name="x" type="i" direction="in"/>
      <arg name="y" type="i" direction="in"/>
    </method>
    <method name="Scroll">
      <arg name="delta" type="i" direction="in"/>
      <arg name="orientation" type="s" direction="in"/>
    </method>
    <signal name="NewTitle"/>
    <signal name="NewIcon"/>
    <signal name="NewAttentionIcon"/>
    <signal name="NewOverlayIcon"/>
    <signal name="NewToolTip"/>
    <signal name="NewStatus">
      <arg name="status" type="s"/>
    </signal>
    <property name="Category" type="s" access="read"/>
    <property name="Id" type="s" access="read"/>
    <property name="Title" type="s" access="read"/>
    <property name="Status" type="s" access="read"/>
    <property name="WindowId" type="i" access="read"/>
    <property name="IconName" type="s" access="read"/>
    <property name="IconPixmap" type="a(iiay)" access="read"/>
    <property name="OverlayIconName" type="s" access="read"/>
    <property name="OverlayIconPixmap" type="a(iiay)" access="read"/>
    <property name="AttentionIconName" type="s" access="read"/>
    <property name="AttentionIconPixmap" type="a(iiay)" access="read"/>
    <property name="AttentionMovieName" type="s" access="read"/>
    <property name="ToolTip" type="(sa(iiay)ss)" access="read"/>
    <property name="ItemIsMenu" type="b" access="read"/>
    <property name="Menu" type="o" access="read"/>
  </interface>
"#;

const MENU_XML: &str = r#"  <interface name="com.canonical.dbusmenu">
    <method name="GetLayout">
      <arg name="parentId" type="i" direction="in"/>
      <arg name="recursionDepth" type="i" direction="in"/>
      <arg name="propertyNames" type="as" direction="in"/>
      <arg name="revision" type="u" direction="out"/>
      <arg name="layout" type="(ia{sv}av)" direction="out"/>
    </method>
    <method name="GetGroupProperties">
      <arg name="ids" type="ai" direction="in"/>
      <arg name="propertyNames" type="as" direction="in"/>
      <arg name="properties" type="a(ia{sv})" direction="out"/>
    </method>
    <method name="GetProperty">
      <arg name="id" type="i" direction="in"/>
      <arg name="name" type="s" direction="in"/>
      <arg name="value" type="v" direction="out"/>
    </method>
    <method name="Event">
      <arg name="id" type="i" direction="in"/>
      <arg name="eventId" type="s" direction="in"/>
      <arg name="data" type="v" direction="in"/>
      <arg name="timestamp" type="u" direction="in"/>
    </method>
    <method name="EventGroup">
      <arg name="events" type="a(isvu)" direction="in"/>
      <arg name="idErrors" type="ai" direction="out"/>
    </method>
    <method name="AboutToShow">
      <arg name="id" type="i" direction="in"/>
      <arg name="needUpdate" type="b" direction="out"/>
    </method>
    <method name="AboutToShowGroup">
      <arg name="ids" type="ai" direction="in"/>
      <arg name="updatesNeeded" type="ai" direction="out"/>
      <arg name="idErrors" type="ai" direction="out"/>
    </method>
    <signal name="ItemsPropertiesUpdated">
      <arg name="updatedProps" type="a(ia{sv})"/>
      <arg name="removedProps" type="a(ias)"/>
    </signal>
    <signal name="LayoutUpdated">
      <arg name="revision" type="u"/>
      <arg name="parent" type="i"/>
    </signal>
    <signal name="ItemActivationRequested">
      <arg name="id" type="i"/>
      <arg name="timestamp" type="u"/>
    </signal>
    <property name="Version" type="u" access="read"/>
    <property name="TextDirection" type="s" access="read"/>
    <property name="Status" type="s" access="read"/>
    <property name="IconThemePath" type="as" access="read"/>
  </interface>
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Item,
    Menu,
}

impl ObjectKind {
    pub fn interface(self) -> &'static str {
        match self {
            ObjectKind::Item => ITEM_INTERFACE,
            ObjectKind::Menu => MENU_INTERFACE,
        }
    }

    fn interface_xml(self) -> &'static str {
        match self {
            ObjectKind::Item => ITEM_XML,
            ObjectKind::Menu => MENU_XML,
        }
    }
}

/// An object reachable over the bus: its path, which protocol it speaks and
/// the properties it serves.
#[derive(Debug)]
pub struct ExportedObject {
    pub path: String,
    pub kind: ObjectKind,
    pub properties: PropertyRegistry,
}

impl ExportedObject {
    pub fn new(path: impl Into<String>, kind: ObjectKind, properties: PropertyRegistry) -> Self {
        ExportedObject {
            path: path.into(),
            kind,
            properties,
        }
    }

    pub fn introspect(&self) -> String {
        format!(
            "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n \
             \"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n\
             <node name=\"{}\">\n{}{}</node>\n",
            self.path,
            self.kind.interface_xml(),
            PROPERTIES_XML
        )
    }
}

#[derive(Debug, Default)]
pub struct ObjectTable {
    objects: HashMap<String, ExportedObject>,
}

impl ObjectTable {
    pub fn export(&mut self, object: ExportedObject) -> Result<(), TrayError> {
        if let Err(e) = ObjectPath::try_from(object.path.as_str()) {
            return Err(TrayError::Export(format!("invalid object path {}: {e}", object.path)));
        }
        if self.objects.contains_key(&object.path) {
            return Err(TrayError::Export(format!("{} is already exported", object.path)));
        }
        debug!(path = %object.path, interface = object.kind.interface(), "exported object");
        self.objects.insert(object.path.clone(), object);
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&ExportedObject> {
        self.objects.get(path)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// A `GetLayout` node in its wire form `(ia{sv}av)`.
#[derive(Debug, PartialEq, Serialize, Type)]
pub struct LayoutItem {
    pub id: i32,
    pub properties: HashMap<String, Value<'static>>,
    pub children: Vec<Value<'static>>,
}

impl From<LayoutNode> for LayoutItem {
    fn from(node: LayoutNode) -> Self {
        LayoutItem {
            id: node.id,
            properties: node
                .properties
                .into_iter()
                .map(|(name, value)| (name, Value::from(value)))
                .collect(),
            children: node
                .children
                .into_iter()
                .map(|child| {
                    let child = LayoutItem::from(child);
                    Value::Structure(Structure::from((child.id, child.properties, child.children)))
                })
                .collect(),
        }
    }
}

type GroupProperties = Vec<(i32, HashMap<String, Value<'static>>)>;

/// Successful outcome of a routed call, one variant per reply signature.
#[derive(Debug, PartialEq)]
pub enum Response {
    Empty,
    Value(Value<'static>),
    Properties(HashMap<String, Value<'static>>),
    Xml(String),
    Layout(u32, LayoutItem),
    Group(GroupProperties),
    Ids(Vec<i32>),
    Flag(bool),
    IdLists(Vec<i32>, Vec<i32>),
}

impl Response {
    async fn send(self, conn: &Connection, call: &Header<'_>) -> zbus::Result<()> {
        match self {
            Response::Empty => conn.reply(call, &()).await,
            Response::Value(value) => conn.reply(call, &value).await,
            Response::Properties(props) => conn.reply(call, &props).await,
            Response::Xml(xml) => conn.reply(call, &xml).await,
            Response::Layout(revision, layout) => conn.reply(call, &(revision, layout)).await,
            Response::Group(group) => conn.reply(call, &group).await,
            Response::Ids(ids) => conn.reply(call, &ids).await,
            Response::Flag(flag) => conn.reply(call, &flag).await,
            Response::IdLists(updates, errors) => conn.reply(call, &(updates, errors)).await,
        }
    }
}

fn args<'b, T>(body: &'b Body) -> fdo::Result<T>
where
    T: Deserialize<'b> + Type,
{
    body.deserialize()
        .map_err(|e| fdo::Error::InvalidArgs(e.to_string()))
}

/// Maps method calls onto the tray and its menu.
pub struct Router {
    tray: Arc<StatusTray>,
    objects: ObjectTable,
}

impl Router {
    /// Builds the object table for `tray`: the item object and the menu object.
    pub fn new(tray: Arc<StatusTray>) -> Result<Self, TrayError> {
        let mut objects = ObjectTable::default();
        objects.export(ExportedObject::new(
            ITEM_PATH,
            ObjectKind::Item,
            tray.item_properties(),
        ))?;
        objects.export(ExportedObject::new(
            MENU_PATH,
            ObjectKind::Menu,
            tray.menu_properties(),
        ))?;
        Ok(Router { tray, objects })
    }

    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    pub fn route(&self, msg: &Message) -> fdo::Result<Response> {
        let header = msg.header();
        let path = header
            .path()
            .ok_or_else(|| fdo::Error::UnknownObject("missing object path".to_string()))?;
        let object = self
            .objects
            .get(path.as_str())
            .ok_or_else(|| fdo::Error::UnknownObject(format!("no object at {path}")))?;
        let member = header
            .member()
            .ok_or_else(|| fdo::Error::UnknownMethod("missing member".to_string()))?;
        let interface = header
            .interface()
            .map(|i| i.as_str())
            .unwrap_or(object.kind.interface());
        debug!(path = %path, interface, member = %member, "bus call");

        let body = msg.body();
        match interface {
            PEER_INTERFACE if member.as_str() == "Ping" => Ok(Response::Empty),
            INTROSPECTABLE_INTERFACE if member.as_str() == "Introspect" => {
                Ok(Response::Xml(object.introspect()))
            }
            PROPERTIES_INTERFACE => Self::properties_call(object, member.as_str(), &body),
            i if i == object.kind.interface() => match object.kind {
                ObjectKind::Item => self.item_call(member.as_str(), &body),
                ObjectKind::Menu => self.menu_call(member.as_str(), &body),
            },
            PEER_INTERFACE | INTROSPECTABLE_INTERFACE => Err(unknown_method(interface, member.as_str())),
            _ => Err(fdo::Error::UnknownInterface(format!(
                "{path} does not implement {interface}"
            ))),
        }
    }

    fn properties_call(object: &ExportedObject, member: &str, body: &Body) -> fdo::Result<Response> {
        match member {
            "Get" => {
                let (interface, property): (String, String) = args(body)?;
                Ok(Response::Value(object.properties.get(&interface, &property)?))
            }
            "GetAll" => {
                let interface: String = args(body)?;
                Ok(Response::Properties(object.properties.get_all(&interface)?))
            }
            "Set" => {
                let (interface, property, value): (String, String, OwnedValue) = args(body)?;
                object
                    .properties
                    .set(&interface, &property, Value::from(value))?;
                Ok(Response::Empty)
            }
            _ => Err(unknown_method(PROPERTIES_INTERFACE, member)),
        }
    }

    fn item_call(&self, member: &str, body: &Body) -> fdo::Result<Response> {
        match member {
            "Activate" => {
                let (x, y): (i32, i32) = args(body)?;
                self.tray.activate(x, y);
            }
            "SecondaryActivate" => {
                let (x, y): (i32, i32) = args(body)?;
                self.tray.secondary_activate(x, y);
            }
            "ContextMenu" => {
                let (x, y): (i32, i32) = args(body)?;
                self.tray.context_menu(x, y);
            }
            "Scroll" => {
                let (delta, orientation): (i32, String) = args(body)?;
                self.tray.scroll(delta, &orientation);
            }
            _ => return Err(unknown_method(ITEM_INTERFACE, member)),
        }
        Ok(Response::Empty)
    }

    fn menu_call(&self, member: &str, body: &Body) -> fdo::Result<Response> {
        let menu = self.tray.menu();
        match member {
            "GetLayout" => {
                let (parent, depth, filter): (i32, i32, Vec<String>) = args(body)?;
                let (revision, node) = menu.get_layout(parent, depth, &filter).ok_or_else(|| {
                    fdo::Error::InvalidArgs(format!("no menu item with id {parent}"))
                })?;
                Ok(Response::Layout(revision, node.into()))
            }
            "GetGroupProperties" => {
                let (ids, filter): (Vec<i32>, Vec<String>) = args(body)?;
                let group = menu
                    .get_group_properties(&ids, &filter)
                    .into_iter()
                    .map(|(id, props)| {
                        let props = props.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
                        (id, props)
                    })
                    .collect();
                Ok(Response::Group(group))
            }
            "GetProperty" => {
                let (id, name): (i32, String) = args(body)?;
                Ok(Response::Value(
                    menu.get_property(id, &name)
                        .map(Value::from)
                        .unwrap_or_else(|| Value::from("")),
                ))
            }
            "Event" => {
                let (id, kind, _data, _timestamp): (i32, String, OwnedValue, u32) = args(body)?;
                menu.event(id, &kind);
                Ok(Response::Empty)
            }
            "EventGroup" => {
                let events: Vec<(i32, String, OwnedValue, u32)> = args(body)?;
                let failed = menu.event_group(events.iter().map(|(id, kind, _, _)| (*id, kind.as_str())));
                Ok(Response::Ids(failed))
            }
            "AboutToShow" => {
                let id: i32 = args(body)?;
                Ok(Response::Flag(menu.about_to_show(id)))
            }
            "AboutToShowGroup" => {
                let ids: Vec<i32> = args(body)?;
                let (updates, errors) = menu.about_to_show_group(&ids);
                Ok(Response::IdLists(updates, errors))
            }
            _ => Err(unknown_method(MENU_INTERFACE, member)),
        }
    }
}

fn unknown_method(interface: &str, member: &str) -> fdo::Error {
    fdo::Error::UnknownMethod(format!("unknown method {interface}.{member}"))
}

/// What the session holds on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRegistration {
    pub bus_name: String,
    pub item_path: &'static str,
    pub menu_path: &'static str,
    /// Service string handed to the watcher, if registration succeeded.
    pub watcher_id: Option<String>,
}

/// A live session bus connection serving one tray.
pub struct BusSession {
    connection: Connection,
    registration: BusRegistration,
    owns_name: bool,
    tasks: Vec<JoinHandle<()>>,
}

impl BusSession {
    pub async fn open(
        tray: Arc<StatusTray>,
        signals: SignalReceiver,
        lost: Arc<Notify>,
    ) -> Result<Self, TrayError> {
        let router = Router::new(tray)?;
        let connection = Connection::session().await?;
        // subscribe before the name is public so no early call is missed
        let stream = MessageStream::from(&connection);

        let bus_name = bus_name_for(std::process::id());
        let owns_name = match connection
            .request_name_with_flags(bus_name.as_str(), RequestNameFlags::DoNotQueue.into())
            .await
        {
            Ok(RequestNameReply::PrimaryOwner) => true,
            Ok(reply) => {
                warn!(name = %bus_name, ?reply, "not the primary owner of the bus name");
                false
            }
            Err(e) => {
                warn!(name = %bus_name, error = %e, "failed to request bus name");
                false
            }
        };

        let tasks = vec![
            tokio::spawn(serve(connection.clone(), router, stream, lost)),
            tokio::spawn(forward_signals(connection.clone(), signals)),
        ];

        let service = if owns_name {
            Some(bus_name.clone())
        } else {
            connection.unique_name().map(|name| name.to_string())
        };
        let watcher_id = match service {
            Some(service) => register_with_watcher(&connection, service).await,
            None => None,
        };

        Ok(BusSession {
            connection,
            registration: BusRegistration {
                bus_name,
                item_path: ITEM_PATH,
                menu_path: MENU_PATH,
                watcher_id,
            },
            owns_name,
            tasks,
        })
    }

    /// Stops serving and gives the bus name back. Returns whether the item
    /// had been registered with the watcher.
    pub async fn close(self) -> bool {
        let registered = self.registration.watcher_id.is_some();
        if let Some(service) = &self.registration.watcher_id {
            info!(%service, "unregistering from StatusNotifierWatcher");
        }
        for task in &self.tasks {
            task.abort();
        }
        if self.owns_name {
            if let Err(e) = self
                .connection
                .release_name(self.registration.bus_name.as_str())
                .await
            {
                warn!(error = %e, "failed to release bus name");
            }
        }
        debug!(name = %self.registration.bus_name, "bus session closed");
        registered
    }
}

async fn register_with_watcher(connection: &Connection, service: String) -> Option<String> {
    let watcher = match StatusNotifierWatcherProxy::new(connection).await {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!(error = %e, "failed to reach StatusNotifierWatcher");
            return None;
        }
    };
    match watcher.register_status_notifier_item(&service).await {
        Ok(()) => {
            info!(service = %service, "registered with StatusNotifierWatcher");
            Some(service)
        }
        Err(e) => {
            warn!(error = %e, "failed to register with StatusNotifierWatcher, the icon may not be shown");
            None
        }
    }
}

async fn serve(connection: Connection, router: Router, mut stream: MessageStream, lost: Arc<Notify>) {
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                // the reader stops after any socket error
                warn!(error = %e, "failed to read bus message");
                break;
            }
        };
        if msg.message_type() != MessageType::MethodCall {
            continue;
        }
        let header = msg.header();
        let sent = match router.route(&msg) {
            Ok(response) => response.send(&connection, &header).await,
            Err(fault) => {
                debug!(error = %fault, "bus call failed");
                connection.reply_dbus_error(&header, fault).await
            }
        };
        if let Err(e) = sent {
            warn!(error = %e, "failed to send reply");
        }
    }
    warn!("session bus connection lost");
    lost.notify_one();
}

async fn forward_signals(connection: Connection, mut signals: SignalReceiver) {
    while let Some(signal) = signals.recv().await {
        let sent = match signal {
            TraySignal::NewIcon => {
                connection
                    .emit_signal(None::<BusName<'_>>, ITEM_PATH, ITEM_INTERFACE, "NewIcon", &())
                    .await
            }
            TraySignal::NewToolTip => {
                connection
                    .emit_signal(None::<BusName<'_>>, ITEM_PATH, ITEM_INTERFACE, "NewToolTip", &())
                    .await
            }
            TraySignal::LayoutUpdated { revision, parent } => {
                connection
                    .emit_signal(
                        None::<BusName<'_>>,
                        MENU_PATH,
                        MENU_INTERFACE,
                        "LayoutUpdated",
                        &(revision, parent),
                    )
                    .await
            }
        };
        match sent {
            Ok(()) => debug!(?signal, "emitted signal"),
            Err(e) => warn!(?signal, error = %e, "failed to emit signal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::RecordingHandler;
    use crate::dispatch::TrayCommand;
    use crate::menu::{QUIT_ID, TOGGLE_ID};
    use zvariant::DynamicType;

    fn router() -> (Router, crate::dispatch::testing::Recorded) {
        let (handler, recorded) = RecordingHandler::new();
        let (tray, _signals) = StatusTray::new(handler);
        (Router::new(tray).unwrap(), recorded)
    }

    fn call<B>(path: &str, interface: Option<&str>, member: &str, body: &B) -> Message
    where
        B: Serialize + DynamicType,
    {
        let mut builder = Message::method_call(path, member).unwrap();
        if let Some(interface) = interface {
            builder = builder.interface(interface).unwrap();
        }
        builder.build(body).unwrap()
    }

    #[test]
    fn test_bus_name() {
        assert_eq!(bus_name_for(4242), "org.kde.StatusNotifierItem-4242-1");
    }

    #[test]
    fn test_export_rejects_bad_paths() {
        let mut table = ObjectTable::default();
        table
            .export(ExportedObject::new(ITEM_PATH, ObjectKind::Item, PropertyRegistry::new()))
            .unwrap();
        assert!(matches!(
            table.export(ExportedObject::new(ITEM_PATH, ObjectKind::Item, PropertyRegistry::new())),
            Err(TrayError::Export(_))
        ));
        assert!(matches!(
            table.export(ExportedObject::new("no/slash", ObjectKind::Menu, PropertyRegistry::new())),
            Err(TrayError::Export(_))
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_property_get() {
        let (router, _) = router();
        let msg = call(ITEM_PATH, Some(PROPERTIES_INTERFACE), "Get", &(ITEM_INTERFACE, "Title"));
        assert_eq!(router.route(&msg).unwrap(), Response::Value(Value::from("Twingate")));

        let msg = call(MENU_PATH, Some(PROPERTIES_INTERFACE), "Get", &(MENU_INTERFACE, "Version"));
        assert_eq!(router.route(&msg).unwrap(), Response::Value(Value::from(3u32)));
    }

    #[test]
    fn test_property_get_all() {
        let (router, _) = router();
        let msg = call(MENU_PATH, Some(PROPERTIES_INTERFACE), "GetAll", &MENU_INTERFACE);
        let Response::Properties(props) = router.route(&msg).unwrap() else {
            panic!("expected a property map");
        };
        assert_eq!(props.len(), 4);
        assert_eq!(props["TextDirection"], Value::from("ltr"));
    }

    #[test]
    fn test_property_faults() {
        let (router, _) = router();
        let msg = call(
            ITEM_PATH,
            Some(PROPERTIES_INTERFACE),
            "Set",
            &(ITEM_INTERFACE, "Title", Value::from("other")),
        );
        assert!(matches!(router.route(&msg), Err(fdo::Error::PropertyReadOnly(_))));

        let msg = call(ITEM_PATH, Some(PROPERTIES_INTERFACE), "Get", &(ITEM_INTERFACE, "Nope"));
        assert!(matches!(router.route(&msg), Err(fdo::Error::UnknownProperty(_))));

        // the menu object does not serve item properties
        let msg = call(MENU_PATH, Some(PROPERTIES_INTERFACE), "Get", &(ITEM_INTERFACE, "Title"));
        assert!(matches!(router.route(&msg), Err(fdo::Error::UnknownInterface(_))));
    }

    #[test]
    fn test_unknown_targets() {
        let (router, _) = router();
        let msg = call("/Elsewhere", Some(ITEM_INTERFACE), "Activate", &(0i32, 0i32));
        assert!(matches!(router.route(&msg), Err(fdo::Error::UnknownObject(_))));

        let msg = call(ITEM_PATH, Some(ITEM_INTERFACE), "Explode", &());
        assert!(matches!(router.route(&msg), Err(fdo::Error::UnknownMethod(_))));

        let msg = call(ITEM_PATH, Some(MENU_INTERFACE), "GetLayout", &(0i32, -1i32, Vec::<String>::new()));
        assert!(matches!(router.route(&msg), Err(fdo::Error::UnknownInterface(_))));
    }

    #[test]
    fn test_bad_arguments() {
        let (router, _) = router();
        let msg = call(MENU_PATH, Some(MENU_INTERFACE), "GetLayout", &"zero");
        assert!(matches!(router.route(&msg), Err(fdo::Error::InvalidArgs(_))));
    }

    #[test]
    fn test_peer_and_introspection() {
        let (router, _) = router();
        for path in [ITEM_PATH, MENU_PATH] {
            let msg = call(path, Some(PEER_INTERFACE), "Ping", &());
            assert_eq!(router.route(&msg).unwrap(), Response::Empty);
        }

        let msg = call(MENU_PATH, Some(INTROSPECTABLE_INTERFACE), "Introspect", &());
        let Response::Xml(xml) = router.route(&msg).unwrap() else {
            panic!("expected introspection data");
        };
        assert!(xml.contains("<node name=\"/MenuBar\">"));
        assert!(xml.contains("com.canonical.dbusmenu"));
        assert!(xml.contains("org.freedesktop.DBus.Properties"));
        assert!(!xml.contains("org.kde.StatusNotifierItem"));
    }

    #[test]
    fn test_get_layout() {
        let (router, _) = router();
        let msg = call(
            MENU_PATH,
            Some(MENU_INTERFACE),
            "GetLayout",
            &(0i32, -1i32, Vec::<String>::new()),
        );
        let Response::Layout(revision, layout) = router.route(&msg).unwrap() else {
            panic!("expected a layout");
        };
        assert_eq!(revision, 1);
        assert_eq!(layout.id, 0);
        assert_eq!(layout.properties["children-display"], Value::from("submenu"));
        assert_eq!(layout.children.len(), 19);
        assert!(matches!(layout.children[0], Value::Structure(_)));

        let msg = call(MENU_PATH, Some(MENU_INTERFACE), "GetLayout", &(999i32, -1i32, Vec::<String>::new()));
        assert!(matches!(router.route(&msg), Err(fdo::Error::InvalidArgs(_))));
    }

    #[tokio::test]
    async fn test_missing_interface_uses_primary() {
        let (router, _) = router();
        let msg = call(MENU_PATH, None, "AboutToShow", &0i32);
        assert_eq!(router.route(&msg).unwrap(), Response::Flag(true));

        let msg = call(ITEM_PATH, None, "Scroll", &(3i32, "vertical"));
        assert_eq!(router.route(&msg).unwrap(), Response::Empty);
    }

    #[test]
    fn test_menu_queries() {
        let (router, _) = router();
        let msg = call(MENU_PATH, Some(MENU_INTERFACE), "GetProperty", &(999i32, "label"));
        assert_eq!(router.route(&msg).unwrap(), Response::Value(Value::from("")));

        let msg = call(MENU_PATH, Some(MENU_INTERFACE), "GetProperty", &(TOGGLE_ID, "label"));
        assert_eq!(router.route(&msg).unwrap(), Response::Value(Value::from("Connect")));

        let msg = call(
            MENU_PATH,
            Some(MENU_INTERFACE),
            "GetGroupProperties",
            &(vec![TOGGLE_ID, 999], vec!["label".to_string()]),
        );
        let Response::Group(group) = router.route(&msg).unwrap() else {
            panic!("expected group properties");
        };
        assert_eq!(group.len(), 1);
        assert_eq!(group[0].0, TOGGLE_ID);
        assert_eq!(group[0].1["label"], Value::from("Connect"));

        let msg = call(MENU_PATH, Some(MENU_INTERFACE), "AboutToShowGroup", &vec![1i32, 3]);
        assert_eq!(
            router.route(&msg).unwrap(),
            Response::IdLists(vec![1, 3], vec![])
        );
    }

    #[tokio::test]
    async fn test_events_dispatch() {
        let (router, recorded) = router();
        let msg = call(
            MENU_PATH,
            Some(MENU_INTERFACE),
            "Event",
            &(TOGGLE_ID, "clicked", Value::from(""), 0u32),
        );
        assert_eq!(router.route(&msg).unwrap(), Response::Empty);
        assert_eq!(recorded.settle(), vec![TrayCommand::Connect]);

        let events = vec![
            (QUIT_ID, "clicked", Value::from(0i32), 0u32),
            (TOGGLE_ID, "hovered", Value::from(0i32), 0u32),
        ];
        let msg = call(MENU_PATH, Some(MENU_INTERFACE), "EventGroup", &events);
        assert_eq!(router.route(&msg).unwrap(), Response::Ids(vec![]));
        assert_eq!(recorded.settle(), vec![TrayCommand::Quit]);
    }

    async fn peer_pair() -> (Connection, Connection) {
        let guid = zbus::Guid::generate();
        let (server, client) = tokio::net::UnixStream::pair().unwrap();
        futures::try_join!(
            zbus::connection::Builder::unix_stream(server)
                .server(guid)
                .unwrap()
                .p2p()
                .build(),
            zbus::connection::Builder::unix_stream(client).p2p().build(),
        )
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_serves_calls_and_signals_over_a_connection() {
        let (server, client) = peer_pair().await;
        let (handler, _recorded) = RecordingHandler::new();
        let (tray, signals) = StatusTray::new(handler);
        let lost = Arc::new(Notify::new());
        let stream = MessageStream::from(&server);
        tokio::spawn(serve(
            server.clone(),
            Router::new(Arc::clone(&tray)).unwrap(),
            stream,
            Arc::clone(&lost),
        ));
        tokio::spawn(forward_signals(server.clone(), signals));

        let reply = client
            .call_method(
                None::<BusName<'_>>,
                MENU_PATH,
                Some(MENU_INTERFACE),
                "GetLayout",
                &(0i32, -1i32, Vec::<String>::new()),
            )
            .await
            .unwrap();
        let (revision, (id, properties, children)): (
            u32,
            (i32, HashMap<String, OwnedValue>, Vec<OwnedValue>),
        ) = reply.body().deserialize().unwrap();
        assert_eq!(revision, 1);
        assert_eq!(id, 0);
        assert!(properties.contains_key("children-display"));
        assert_eq!(children.len(), 19);

        let fault = client
            .call_method(
                None::<BusName<'_>>,
                ITEM_PATH,
                Some(PROPERTIES_INTERFACE),
                "Get",
                &(ITEM_INTERFACE, "Nope"),
            )
            .await
            .unwrap_err();
        match fault {
            zbus::Error::MethodError(name, _, _) => {
                assert_eq!(name.as_str(), "org.freedesktop.DBus.Error.UnknownProperty")
            }
            other => panic!("expected an error reply, got {other:?}"),
        }

        let mut incoming = MessageStream::from(&client);
        tray.update_status(true);
        let mut emitted = Vec::new();
        while emitted.len() < 3 {
            let msg = tokio::time::timeout(std::time::Duration::from_secs(5), incoming.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if msg.message_type() != MessageType::Signal {
                continue;
            }
            let header = msg.header();
            let member = header.member().unwrap().to_string();
            if member == "LayoutUpdated" {
                assert_eq!(header.path().unwrap().as_str(), MENU_PATH);
                assert_eq!(msg.body().deserialize::<(u32, i32)>().unwrap(), (2, 0));
            } else {
                assert_eq!(header.path().unwrap().as_str(), ITEM_PATH);
            }
            emitted.push(member);
        }
        assert_eq!(emitted, ["NewIcon", "NewToolTip", "LayoutUpdated"]);

        drop(incoming);
        drop(client);
        tokio::time::timeout(std::time::Duration::from_secs(5), lost.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_reports_watcher_registration() {
        let (server, _client) = peer_pair().await;
        let session = |watcher_id: Option<String>| BusSession {
            connection: server.clone(),
            registration: BusRegistration {
                bus_name: bus_name_for(1),
                item_path: ITEM_PATH,
                menu_path: MENU_PATH,
                watcher_id,
            },
            owns_name: false,
            tasks: Vec::new(),
        };
        assert!(!session(None).close().await);
        assert!(session(Some(":1.7".into())).close().await);
    }
}
