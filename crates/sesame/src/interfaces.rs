//! Bus interface and member names used by the Secret Service protocol.

pub const SERVICE_INTERFACE: &str = "org.freedesktop.Secret.Service";
pub const COLLECTION_INTERFACE: &str = "org.freedesktop.Secret.Collection";
pub const ITEM_INTERFACE: &str = "org.freedesktop.Secret.Item";
pub const SESSION_INTERFACE: &str = "org.freedesktop.Secret.Session";
pub const PROMPT_INTERFACE: &str = "org.freedesktop.Secret.Prompt";
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Session algorithm identifiers.
pub mod algorithms {
    pub const PLAIN: &str = "plain";
    pub const DH_AES: &str = "dh-ietf1024-sha256-aes128-cbc-pkcs7";
}

/// Property names.
pub mod props {
    pub const COLLECTIONS: &str = "Collections";
    pub const ITEMS: &str = "Items";
    pub const LABEL: &str = "Label";
    pub const ATTRIBUTES: &str = "Attributes";
    pub const LOCKED: &str = "Locked";
    pub const CREATED: &str = "Created";
    pub const MODIFIED: &str = "Modified";

    /// Keys of the `a{sv}` property dictionaries passed to create methods.
    pub const ITEM_LABEL: &str = "org.freedesktop.Secret.Item.Label";
    pub const ITEM_ATTRIBUTES: &str = "org.freedesktop.Secret.Item.Attributes";
    pub const COLLECTION_LABEL: &str = "org.freedesktop.Secret.Collection.Label";
}
