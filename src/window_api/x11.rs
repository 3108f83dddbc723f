use std::time::Duration;

use anyhow::{Result, anyhow};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::instrument;
use xcb::{
    Connection, Xid,
    screensaver::QueryInfo,
    x::{
        self, ATOM_ANY, ATOM_NONE, Atom, Drawable, GetProperty, GrabServer, InternAtom,
        UngrabServer, Window,
    },
};

use super::{IdleSource, WindowSample, WindowSampler, executable_name};

fn root_window(conn: &Connection, screen: usize) -> Result<Window> {
    Ok(conn
        .get_setup()
        .roots()
        .nth(screen)
        .ok_or_else(|| anyhow!("Screen {screen} is not available"))?
        .root())
}

fn intern_atom(conn: &Connection, name: &[u8]) -> Result<Atom> {
    let reply = conn.wait_for_reply(conn.send_request(&InternAtom {
        only_if_exists: false,
        name,
    }))?;
    Ok(reply.atom())
}

fn get_pid(conn: &Connection, window: Window, pid_atom: Atom) -> Result<Option<u32>> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window,
        property: pid_atom,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    Ok(result.value::<u32>().first().copied())
}

fn get_active_window(
    conn: &Connection,
    root: Window,
    active_window_atom: Atom,
) -> Result<Option<Window>> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window: root,
        property: active_window_atom,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    if result.r#type() == ATOM_NONE {
        return Ok(None);
    }
    Ok(result
        .value::<Window>()
        .first()
        .copied()
        .filter(|v| !v.is_none()))
}

pub fn get_name(conn: &Connection, window: Window, wm_name_atom: Atom) -> Result<String> {
    let wm_name = conn.wait_for_reply(conn.send_request(&x::GetProperty {
        delete: false,
        window,
        property: wm_name_atom,
        r#type: x::ATOM_ANY,
        long_offset: 0,
        long_length: 1024,
    }))?;
    Ok(String::from_utf8_lossy(wm_name.value()).into_owned())
}

pub struct LinuxWindowSampler {
    connection: Connection,
    preferred_screen: usize,
    active_window_atom: Atom,
    window_name_atom: Atom,
    pid_atom: Atom,
    system: System,
}

impl LinuxWindowSampler {
    pub fn new() -> Result<Self> {
        let (connection, preferred_screen) = xcb::Connection::connect(None)?;
        let active_window_atom = intern_atom(&connection, b"_NET_ACTIVE_WINDOW")?;
        let window_name_atom = intern_atom(&connection, b"_NET_WM_NAME")?;
        let pid_atom = intern_atom(&connection, b"_NET_WM_PID")?;
        Ok(Self {
            connection,
            preferred_screen: preferred_screen.max(0) as usize,
            active_window_atom,
            window_name_atom,
            pid_atom,
            system: System::new(),
        })
    }

    fn get_process_name(&mut self, id: u32) -> Option<String> {
        let pid = Pid::from_u32(id);
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let process = self.system.process(pid)?;

        process
            .exe()
            .and_then(|v| v.to_str())
            .map(|v| v.to_string())
            .or_else(|| process.name().to_str().map(|v| v.to_string()))
    }

    #[instrument(skip(self))]
    fn get_active_inner(&mut self) -> Result<Option<WindowSample>> {
        // Currently the application only supports 1 x11 screen.
        let root = root_window(&self.connection, self.preferred_screen)?;

        let Some(active_window) =
            get_active_window(&self.connection, root, self.active_window_atom)?
        else {
            return Ok(None);
        };
        let window_name = get_name(&self.connection, active_window, self.window_name_atom)?;
        let Some(pid) = get_pid(&self.connection, active_window, self.pid_atom)? else {
            return Err(anyhow!("Active window has no _NET_WM_PID"));
        };
        // The process might have exited between the two queries.
        let process_name = self
            .get_process_name(pid)
            .ok_or_else(|| anyhow!("Process {pid} vanished"))?;
        Ok(Some(WindowSample {
            application: executable_name(&process_name),
            window_title: window_name.into(),
        }))
    }
}

impl WindowSampler for LinuxWindowSampler {
    #[instrument(skip(self))]
    fn current_foreground_window(&mut self) -> Result<Option<WindowSample>> {
        let _ = self.connection.send_request(&GrabServer {});

        let result = self.get_active_inner();
        let _ = self.connection.send_request(&UngrabServer {});
        result
    }
}

/// Idle time from the X screensaver extension. Uses its own connection so that it can be polled
/// from the input thread.
pub struct LinuxIdleSource {
    connection: Connection,
    preferred_screen: usize,
}

impl LinuxIdleSource {
    pub fn new() -> Result<Self> {
        let (connection, preferred_screen) = xcb::Connection::connect_with_extensions(
            None,
            &[xcb::Extension::ScreenSaver],
            &[],
        )?;
        Ok(Self {
            connection,
            preferred_screen: preferred_screen.max(0) as usize,
        })
    }
}

impl IdleSource for LinuxIdleSource {
    #[instrument(skip(self))]
    fn idle_time(&mut self) -> Result<Duration> {
        let root = root_window(&self.connection, self.preferred_screen)?;
        let reply = self
            .connection
            .wait_for_reply(self.connection.send_request(&QueryInfo {
                drawable: Drawable::Window(root),
            }))?;
        Ok(Duration::from_millis(reply.ms_since_user_input().into()))
    }
}
