//! Generated bindings for protocols not shipped by `wayland-protocols`.

/// `wl_webos_shell` and `wl_webos_shell_surface`.
#[allow(dead_code, unused_imports, non_upper_case_globals, clippy::all, clippy::pedantic, clippy::nursery)]
pub mod webos_shell {
    use wayland_client;
    use wayland_client::protocol::*;

    pub mod __interfaces {
        use wayland_client::protocol::__interfaces::*;
        wayland_scanner::generate_interfaces!("protocols/webos-shell.xml");
    }
    use self::__interfaces::*;

    wayland_scanner::generate_client_code!("protocols/webos-shell.xml");
}
