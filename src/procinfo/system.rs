use netstat2::{
    AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, TcpState, get_sockets_info,
};
use sysinfo::{Pid, PidExt, ProcessExt, ProcessStatus, System, SystemExt, UserExt};

use super::{
    EnumerationError, ProcessProvider, ProcessQueryError, ProcessRecord, SocketRecord, SocketState,
};

/// Process-info provider backed by the OS socket table and process table.
pub struct SystemProvider {
    system: System,
}

impl SystemProvider {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_users_list();
        Self { system }
    }
}

impl Default for SystemProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProvider for SystemProvider {
    fn connections(&mut self) -> Result<Vec<SocketRecord>, EnumerationError> {
        let families = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
        let sockets = get_sockets_info(families, ProtocolFlags::TCP)
            .map_err(|e| EnumerationError(e.to_string()))?;

        let mut records = Vec::with_capacity(sockets.len());
        for socket in sockets {
            if let ProtocolSocketInfo::Tcp(tcp) = socket.protocol_socket_info {
                records.push(SocketRecord {
                    local_port: tcp.local_port,
                    remote_addr: tcp.remote_addr,
                    remote_port: tcp.remote_port,
                    state: if tcp.state == TcpState::Established {
                        SocketState::Established
                    } else {
                        SocketState::Other
                    },
                    pid: socket.associated_pids.first().copied(),
                });
            }
        }
        Ok(records)
    }

    fn process(&mut self, pid: u32) -> Result<ProcessRecord, ProcessQueryError> {
        let sys_pid = Pid::from_u32(pid);
        if !self.system.refresh_process(sys_pid) {
            return Err(ProcessQueryError::NotFound);
        }

        let (exe_path, name, cmdline, user_id, parent_pid, status) = {
            let process = self
                .system
                .process(sys_pid)
                .ok_or(ProcessQueryError::NotFound)?;
            (
                process.exe().to_path_buf(),
                process.name().to_string(),
                process.cmd().to_vec(),
                process.user_id().cloned(),
                process.parent(),
                process.status(),
            )
        };

        if status == ProcessStatus::Zombie {
            return Err(ProcessQueryError::Zombie);
        }
        // The kernel withholds the executable link for processes we may not
        // inspect; an empty path is the only signal we get.
        if exe_path.as_os_str().is_empty() {
            return Err(ProcessQueryError::AccessDenied);
        }

        let parent_exe = parent_pid.and_then(|ppid| {
            self.system.refresh_process(ppid);
            self.system
                .process(ppid)
                .map(|p| p.exe().to_path_buf())
                .filter(|p| !p.as_os_str().is_empty())
        });

        let username = user_id
            .and_then(|uid| self.system.get_user_by_id(&uid))
            .map(|user| user.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(ProcessRecord {
            exe_path,
            name,
            parent_exe,
            username,
            cmdline,
        })
    }
}
