//! Command shell.
//!
//! Line editor over the keyboard ring plus a builtin command table over
//! the VFS and scheduler APIs. Parsing and execution are separated from
//! the input loop so command behavior is testable against an in-memory
//! filesystem.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::fs::{self, FileKind, Vfs};

/// Normalize a path against a working directory: join if relative, then
/// fold `.` and `..` components.
pub fn normalize(cwd: &str, arg: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let joined: String = if arg.starts_with('/') {
        arg.to_string()
    } else {
        format!("{}/{}", cwd, arg)
    };
    for component in joined.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        String::from("/")
    } else {
        let mut out = String::new();
        for part in parts {
            out.push('/');
            out.push_str(part);
        }
        out
    }
}

/// Shell state: just the working directory.
pub struct Shell {
    cwd: String,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    pub fn new() -> Self {
        Self {
            cwd: String::from("/"),
        }
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    fn resolve_arg(&self, arg: &str) -> String {
        normalize(&self.cwd, arg)
    }

    /// Parse and run one command line.
    pub fn execute_line(&mut self, vfs: &mut Vfs, line: &str) -> KernelResult<()> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&cmd, args)) = tokens.split_first() else {
            return Ok(());
        };

        match cmd {
            "help" => self.cmd_help(),
            "ls" => self.cmd_ls(vfs, args.first().copied()),
            "cat" => self.cmd_cat(vfs, args),
            "stat" => self.cmd_stat(vfs, args),
            "touch" => self.cmd_touch(vfs, args),
            "rm" => self.cmd_rm(vfs, args),
            "mkdir" => self.cmd_mkdir(vfs, args),
            "rmdir" => self.cmd_rmdir(vfs, args),
            "ln" => self.cmd_ln(vfs, args),
            "chmod" => self.cmd_chmod(vfs, args),
            "chown" => self.cmd_chown(vfs, args),
            "echo" => self.cmd_echo(vfs, args),
            "hexdump" => self.cmd_hexdump(vfs, args),
            "cd" => self.cmd_cd(vfs, args),
            "pwd" => {
                println!("{}", self.cwd);
                Ok(())
            }
            "ps" => self.cmd_ps(),
            "meminfo" => self.cmd_meminfo(vfs),
            "uptime" => {
                println!("{}", crate::timer::format_uptime(crate::timer::uptime_secs()));
                Ok(())
            }
            "clear" => {
                #[cfg(all(target_arch = "x86", target_os = "none"))]
                crate::arch::x86::vga::clear();
                Ok(())
            }
            _ => {
                println!("{}: command not found", cmd);
                Ok(())
            }
        }
    }

    fn cmd_help(&self) -> KernelResult<()> {
        println!("commands:");
        println!("  ls [path]        cat <file>       stat <path>");
        println!("  touch <file>     rm <path>        mkdir <dir>      rmdir <dir>");
        println!("  ln -s <target> <link>             chmod <octal> <path>");
        println!("  chown <uid>:<gid> <path>          echo <text> [> file]");
        println!("  hexdump <file>   cd <dir>         pwd");
        println!("  ps               meminfo          uptime           clear");
        Ok(())
    }

    fn one_arg<'a>(&self, args: &[&'a str]) -> KernelResult<&'a str> {
        args.first().copied().ok_or(KernelError::InvalidArgument)
    }

    fn cmd_ls(&self, vfs: &mut Vfs, arg: Option<&str>) -> KernelResult<()> {
        let path = self.resolve_arg(arg.unwrap_or("."));
        let entries = vfs.list_directory(&path)?;
        for entry in entries {
            let child = if path == "/" {
                format!("/{}", entry.name)
            } else {
                format!("{}/{}", path, entry.name)
            };
            match vfs.lstat(&child) {
                Ok(st) => println!(
                    "{} {:2} {:4} {:4} {:8} {} {}",
                    fs::mode_string(st.mode),
                    st.links,
                    st.uid,
                    st.gid,
                    st.size,
                    crate::timer::format_uptime(u64::from(st.mtime)),
                    entry.name,
                ),
                Err(_) => println!("?????????? {}", entry.name),
            }
        }
        Ok(())
    }

    fn cmd_cat(&self, vfs: &mut Vfs, args: &[&str]) -> KernelResult<()> {
        let path = self.resolve_arg(self.one_arg(args)?);
        let handle = vfs.open(&path)?;
        let mut buf = [0u8; 512];
        loop {
            let n = match vfs.read(handle, &mut buf) {
                Ok(n) => n,
                Err(err) => {
                    let _ = vfs.close(handle);
                    return Err(err);
                }
            };
            if n == 0 {
                break;
            }
            print!("{}", String::from_utf8_lossy(&buf[..n]));
        }
        println!();
        vfs.close(handle)
    }

    fn cmd_stat(&self, vfs: &mut Vfs, args: &[&str]) -> KernelResult<()> {
        let path = self.resolve_arg(self.one_arg(args)?);
        let st = vfs.lstat(&path)?;
        println!("  path:  {}", path);
        println!("  inode: {}  links: {}", st.ino, st.links);
        println!("  mode:  {} ({:o})", fs::mode_string(st.mode), st.mode & 0o777);
        println!("  owner: {}:{}", st.uid, st.gid);
        println!("  size:  {} bytes, {} sectors", st.size, st.blocks);
        println!(
            "  atime: {}  mtime: {}  ctime: {}",
            crate::timer::format_uptime(u64::from(st.atime)),
            crate::timer::format_uptime(u64::from(st.mtime)),
            crate::timer::format_uptime(u64::from(st.ctime)),
        );
        Ok(())
    }

    fn cmd_touch(&self, vfs: &mut Vfs, args: &[&str]) -> KernelResult<()> {
        let path = self.resolve_arg(self.one_arg(args)?);
        match vfs.create(&path, FileKind::File) {
            Ok(()) | Err(KernelError::Exists) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn cmd_rm(&self, vfs: &mut Vfs, args: &[&str]) -> KernelResult<()> {
        let path = self.resolve_arg(self.one_arg(args)?);
        if vfs.lstat(&path)?.kind == FileKind::Dir {
            return Err(KernelError::IsDirectory);
        }
        vfs.unlink(&path)
    }

    fn cmd_mkdir(&self, vfs: &mut Vfs, args: &[&str]) -> KernelResult<()> {
        let path = self.resolve_arg(self.one_arg(args)?);
        vfs.create(&path, FileKind::Dir)
    }

    fn cmd_rmdir(&self, vfs: &mut Vfs, args: &[&str]) -> KernelResult<()> {
        let path = self.resolve_arg(self.one_arg(args)?);
        if vfs.lstat(&path)?.kind != FileKind::Dir {
            return Err(KernelError::NotDirectory);
        }
        vfs.unlink(&path)
    }

    fn cmd_ln(&self, vfs: &mut Vfs, args: &[&str]) -> KernelResult<()> {
        // only symbolic links are supported
        if args.len() != 3 || args[0] != "-s" {
            return Err(KernelError::InvalidArgument);
        }
        let link = self.resolve_arg(args[2]);
        vfs.create_symlink(&link, args[1])
    }

    fn cmd_chmod(&self, vfs: &mut Vfs, args: &[&str]) -> KernelResult<()> {
        if args.len() != 2 {
            return Err(KernelError::InvalidArgument);
        }
        let mode =
            u16::from_str_radix(args[0], 8).map_err(|_| KernelError::InvalidArgument)?;
        let path = self.resolve_arg(args[1]);
        vfs.chmod(&path, mode)
    }

    fn cmd_chown(&self, vfs: &mut Vfs, args: &[&str]) -> KernelResult<()> {
        if args.len() != 2 {
            return Err(KernelError::InvalidArgument);
        }
        let (uid, gid) = args[0]
            .split_once(':')
            .ok_or(KernelError::InvalidArgument)?;
        let uid: u16 = uid.parse().map_err(|_| KernelError::InvalidArgument)?;
        let gid: u16 = gid.parse().map_err(|_| KernelError::InvalidArgument)?;
        let path = self.resolve_arg(args[1]);
        vfs.chown(&path, uid, gid)
    }

    fn cmd_echo(&self, vfs: &mut Vfs, args: &[&str]) -> KernelResult<()> {
        // `echo words... > file` writes; plain echo prints
        if let Some(redir) = args.iter().position(|&a| a == ">") {
            let Some(target) = args.get(redir + 1) else {
                return Err(KernelError::InvalidArgument);
            };
            let text = format!("{}\n", args[..redir].join(" "));
            let path = self.resolve_arg(target);
            if !vfs.exists(&path) {
                vfs.create(&path, FileKind::File)?;
            }
            let handle = vfs.open(&path)?;
            let result = vfs
                .truncate(handle, 0)
                .and_then(|()| vfs.write(handle, text.as_bytes()).map(|_| ()));
            let _ = vfs.close(handle);
            result
        } else {
            println!("{}", args.join(" "));
            Ok(())
        }
    }

    fn cmd_hexdump(&self, vfs: &mut Vfs, args: &[&str]) -> KernelResult<()> {
        let path = self.resolve_arg(self.one_arg(args)?);
        let handle = vfs.open(&path)?;
        let mut offset = 0usize;
        let mut buf = [0u8; 16];
        loop {
            let n = match vfs.read(handle, &mut buf) {
                Ok(n) => n,
                Err(err) => {
                    let _ = vfs.close(handle);
                    return Err(err);
                }
            };
            if n == 0 {
                break;
            }
            print!("{:08x}  ", offset);
            for (i, byte) in buf.iter().enumerate() {
                if i < n {
                    print!("{:02x} ", byte);
                } else {
                    print!("   ");
                }
                if i == 7 {
                    print!(" ");
                }
            }
            print!(" |");
            for byte in &buf[..n] {
                let ch = if byte.is_ascii_graphic() || *byte == b' ' {
                    *byte as char
                } else {
                    '.'
                };
                print!("{}", ch);
            }
            println!("|");
            offset += n;
        }
        vfs.close(handle)
    }

    fn cmd_cd(&mut self, vfs: &mut Vfs, args: &[&str]) -> KernelResult<()> {
        let path = self.resolve_arg(args.first().copied().unwrap_or("/"));
        if vfs.stat(&path)?.kind != FileKind::Dir {
            return Err(KernelError::NotDirectory);
        }
        self.cwd = path;
        Ok(())
    }

    fn cmd_ps(&self) -> KernelResult<()> {
        println!("  pid pri state      slice  mail name");
        for task in crate::sched::tasks_snapshot() {
            println!(
                "  {:3} {:3} {:<10} {:5} {:5} {}",
                task.pid,
                task.priority,
                format!("{:?}", task.state),
                task.time_slice,
                task.queued_messages,
                task.name,
            );
        }
        Ok(())
    }

    fn cmd_meminfo(&self, vfs: &mut Vfs) -> KernelResult<()> {
        let frames = crate::mm::frame::stats();
        println!(
            "frames: {}/{} free ({} KiB free)",
            frames.free_pages,
            frames.total_pages,
            frames.free_pages * 4,
        );
        let heap = crate::mm::heap_stats();
        println!(
            "heap:   {} total, {} used, {} free",
            heap.total, heap.used, heap.free,
        );
        let (free_blocks, free_inodes) = vfs.volume_stats();
        println!("disk:   {} free blocks, {} free inodes", free_blocks, free_inodes);
        Ok(())
    }
}

/// Entry point of the shell task: greet, then read-eval-print forever,
/// cooperating with the scheduler between keys.
pub fn shell_task() {
    println!();
    println!("OnyxOS shell; 'help' lists commands.");
    print!("onyx:/$ ");

    let mut shell = Shell::new();
    let mut line = String::new();

    loop {
        crate::sched::maybe_resched();
        let Some(byte) = crate::drivers::keyboard::pop_key() else {
            crate::arch::idle_wait();
            continue;
        };
        match byte {
            b'\n' => {
                println!();
                let result = fs::with_root(|vfs| shell.execute_line(vfs, &line));
                if let Err(err) = result {
                    println!("error: {}", err);
                }
                line.clear();
                print!("onyx:{}$ ", shell.cwd());
            }
            0x08 | 0x7f => {
                if line.pop().is_some() {
                    print!("\u{8}");
                }
            }
            _ => {
                line.push(byte as char);
                print!("{}", byte as char);
            }
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn normalization() {
        assert_eq!(normalize("/", "a"), "/a");
        assert_eq!(normalize("/d", "x"), "/d/x");
        assert_eq!(normalize("/d", "/abs"), "/abs");
        assert_eq!(normalize("/d", ".."), "/");
        assert_eq!(normalize("/a/b", "../c"), "/a/c");
        assert_eq!(normalize("/", "./x/./y"), "/x/y");
        assert_eq!(normalize("/", "../.."), "/");
        assert_eq!(normalize("/a", "b/"), "/a/b");
    }
}
