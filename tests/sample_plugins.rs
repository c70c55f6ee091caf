//! Tests for the shipped sample handler bundle, including the login
//! decode boundary cases.

use std::path::PathBuf;

use mlua::{Function, Lua, Table};

use tapline::core::PacketHandler;
use tapline::plugin::{register_host_fns, PluginHandler};

fn sample_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("plugins/7777-localhost-25565")
        .join(name)
}

/// Wire format: BE u32 protocol version, u16-length-prefixed username,
/// u16-length-prefixed password.
fn login_payload(version: u32, username: &str, password: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&version.to_be_bytes());
    payload.extend_from_slice(&(username.len() as u16).to_be_bytes());
    payload.extend_from_slice(username.as_bytes());
    payload.extend_from_slice(&(password.len() as u16).to_be_bytes());
    payload.extend_from_slice(password.as_bytes());
    payload
}

fn load_sample_client(lua: &Lua) -> Table {
    register_host_fns(lua, "7777-localhost-25565/cl.lua").unwrap();
    let source = std::fs::read_to_string(sample_path("cl.lua")).unwrap();
    lua.load(&source).eval().unwrap()
}

#[test]
fn test_sample_bundle_passes_validation() {
    let mut cl = PluginHandler::open(sample_path("cl.lua")).unwrap();
    let mut sv = PluginHandler::open(sample_path("sv.lua")).unwrap();
    assert_eq!(cl.chunk_size().unwrap(), 1024);
    assert_eq!(sv.chunk_size().unwrap(), 1024);
}

#[test]
fn test_sample_client_is_a_pure_observer() {
    let mut cl = PluginHandler::open(sample_path("cl.lua")).unwrap();

    // Registered login opcode: decoded and logged, forwarded unchanged
    let mut chunk = vec![0x01];
    chunk.extend_from_slice(&login_payload(5, "steve", "hunter2"));
    assert!(cl.transform(&chunk).unwrap().is_none());

    // Unregistered opcode: hex-dumped by the fallback, forwarded unchanged
    assert!(cl.transform(&[0x42, 0xDE, 0xAD]).unwrap().is_none());
}

#[test]
fn test_sample_server_is_a_pure_observer() {
    let mut sv = PluginHandler::open(sample_path("sv.lua")).unwrap();
    assert!(sv.transform(&[0x02, 0x00, 0xFF]).unwrap().is_none());
}

#[test]
fn test_login_decode_empty_username_and_password() {
    let lua = Lua::new();
    let module = load_sample_client(&lua);
    let decode: Function = module.get("decode_login").unwrap();

    let payload = lua.create_string(login_payload(0, "", "")).unwrap();
    let fields: Table = decode.call(payload).unwrap();

    assert_eq!(fields.get::<u32>("version").unwrap(), 0);
    assert_eq!(fields.get::<String>("username").unwrap(), "");
    assert_eq!(fields.get::<String>("password").unwrap(), "");
}

#[test]
fn test_login_decode_plain_fields() {
    let lua = Lua::new();
    let module = load_sample_client(&lua);
    let decode: Function = module.get("decode_login").unwrap();

    let payload = lua
        .create_string(login_payload(754, "steve", "hunter2"))
        .unwrap();
    let fields: Table = decode.call(payload).unwrap();

    assert_eq!(fields.get::<u32>("version").unwrap(), 754);
    assert_eq!(fields.get::<String>("username").unwrap(), "steve");
    assert_eq!(fields.get::<String>("password").unwrap(), "hunter2");
}

#[test]
fn test_login_decode_non_ascii_username_roundtrip() {
    let lua = Lua::new();
    let module = load_sample_client(&lua);
    let decode: Function = module.get("decode_login").unwrap();

    let username = "żółw麻布";
    let payload = lua
        .create_string(login_payload(1, username, "secret"))
        .unwrap();
    let fields: Table = decode.call(payload).unwrap();

    assert_eq!(fields.get::<String>("username").unwrap(), username);
    assert_eq!(fields.get::<String>("password").unwrap(), "secret");
}

#[test]
fn test_login_decode_malformed_payload_raises() {
    let lua = Lua::new();
    let module = load_sample_client(&lua);
    let decode: Function = module.get("decode_login").unwrap();

    // Too short to carry the version field
    let payload = lua.create_string([0x00, 0x01]).unwrap();
    let result: mlua::Result<Table> = decode.call(payload);
    assert!(result.is_err());
}
