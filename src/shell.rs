//! The interactive shell: one command per line on the input, replies on
//! the output, until `exit` or end of input.
//!
//! The shell owns the reply vocabulary. Engine errors are mapped to the
//! short replies each command documents; anything unmapped is reported
//! verbatim as `ERROR: <message>`.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};

use log::warn;

use crate::check;
use crate::disk::Disk;
use crate::error::FsError;
use crate::volume::Volume;

const HLINE_WIDTH: usize = 61;

pub struct Shell<D: Disk> {
    volume: Volume<D>,
    /// Boot record signature used by the `format` command.
    signature: String,
    /// Boot record description used by the `format` command.
    description: String,
    /// Worker threads for the `check` command.
    check_workers: usize,
    prompt: String,
}

impl<D: Disk> Shell<D> {
    pub fn new(volume: Volume<D>, signature: String, description: String, check_workers: usize) -> Self {
        Self {
            volume,
            signature,
            description,
            check_workers,
            prompt: "> ".to_string(),
        }
    }

    /// Read commands from `input` until `exit` or EOF.
    pub fn run<R: BufRead, W: Write>(&mut self, input: &mut R, output: &mut W) -> io::Result<()> {
        loop {
            write!(output, "{}", self.prompt)?;
            output.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                return Ok(());
            }
            if !self.handle(&line, output)? {
                return Ok(());
            }
        }
    }

    /// Dispatch one command line. Returns false when the shell should stop.
    pub fn handle<W: Write>(&mut self, line: &str, output: &mut W) -> io::Result<bool> {
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = args.first() else {
            return Ok(true);
        };

        match command {
            "exit" => return Ok(false),
            "opened" => {
                writeln!(output, "{}", if self.volume.is_opened() { "YES" } else { "NO" })?
            }
            "format" => self.cmd_format(&args, output)?,
            "pwd" => self.cmd_pwd(output)?,
            "cd" => self.cmd_cd(&args, output)?,
            "ls" => self.cmd_ls(&args, output)?,
            "info" => self.cmd_info(&args, output)?,
            "cat" => self.cmd_cat(&args, output)?,
            "mkdir" => self.cmd_mkdir(&args, output)?,
            "rmdir" => self.cmd_rmdir(&args, output)?,
            "incp" => self.cmd_incp(&args, output)?,
            "outcp" => self.cmd_outcp(&args, output)?,
            "rm" => self.cmd_rm(&args, output)?,
            "mv" => self.cmd_mv(&args, output)?,
            "cp" => self.cmd_cp(&args, output)?,
            "bootrecord" => self.cmd_bootrecord(output)?,
            "mft" => self.cmd_mft(&args, output)?,
            "bitmap" => self.cmd_bitmap(output)?,
            "check" => self.cmd_check(output)?,
            _ => writeln!(output, "UNKNOWN COMMAND")?,
        }
        Ok(true)
    }

    // --- reply mapping ---

    fn reply_dir(err: &FsError) -> String {
        match err {
            FsError::PathNotFound(_)
            | FsError::NotADirectory(_)
            | FsError::NodeNotFound(_)
            | FsError::RootNotFound => "PATH NOT FOUND".into(),
            FsError::AlreadyExists(_) => "EXISTS".into(),
            FsError::DirectoryNotEmpty(_) => "NOT EMPTY".into(),
            other => format!("ERROR: {other}"),
        }
    }

    fn reply_file(err: &FsError) -> String {
        match err {
            FsError::PathNotFound(_)
            | FsError::FileNotFound(_)
            | FsError::NotAFile(_)
            | FsError::NotADirectory(_)
            | FsError::NodeNotFound(_) => "FILE NOT FOUND".into(),
            other => format!("ERROR: {other}"),
        }
    }

    /// Replies for the two-path commands, which distinguish a missing
    /// source from a missing destination.
    fn reply_transfer(err: &FsError) -> String {
        match err {
            FsError::FileNotFound(_) | FsError::NotAFile(_) => "FILE NOT FOUND".into(),
            FsError::PathNotFound(_) | FsError::NotADirectory(_) => "PATH NOT FOUND".into(),
            FsError::AlreadyExists(_) => "EXISTS".into(),
            other => format!("ERROR: {other}"),
        }
    }

    // --- commands ---

    fn cmd_format<W: Write>(&mut self, args: &[&str], output: &mut W) -> io::Result<()> {
        let Some(size_arg) = args.get(1) else {
            return writeln!(output, "ERROR: size of the partition not given");
        };

        let size = match parse_size(size_arg) {
            Ok(size) => size,
            Err(message) => return writeln!(output, "ERROR: {message}"),
        };

        let signature = self.signature.clone();
        let description = self.description.clone();
        match self.volume.format(size, &signature, &description) {
            Ok(()) => writeln!(output, "OK"),
            Err(err) => {
                warn!("format failed: {err}");
                writeln!(output, "CANNOT CREATE FILE")
            }
        }
    }

    fn cmd_pwd<W: Write>(&self, output: &mut W) -> io::Result<()> {
        match self.volume.pwd() {
            Ok(path) => writeln!(output, "{path}"),
            Err(err) => writeln!(output, "ERROR: {err}"),
        }
    }

    fn cmd_cd<W: Write>(&mut self, args: &[&str], output: &mut W) -> io::Result<()> {
        let Some(path) = args.get(1) else {
            return writeln!(output, "ERROR: path of the directory not given");
        };
        match self.volume.cd(path) {
            Ok(()) => Ok(()),
            Err(err) => writeln!(output, "{}", Self::reply_dir(&err)),
        }
    }

    fn cmd_ls<W: Write>(&self, args: &[&str], output: &mut W) -> io::Result<()> {
        let path = args.get(1).copied().unwrap_or("");
        match self.volume.ls(path) {
            Ok(children) => {
                for child in children {
                    let kind = if child.is_directory() { '+' } else { '-' };
                    writeln!(output, "{kind}{}", child.name())?;
                }
                Ok(())
            }
            Err(err) => writeln!(output, "{}", Self::reply_dir(&err)),
        }
    }

    fn cmd_info<W: Write>(&self, args: &[&str], output: &mut W) -> io::Result<()> {
        let Some(path) = args.get(1) else {
            return writeln!(output, "ERROR: path of the node not given");
        };
        let info = match self.volume.info(path) {
            Ok(info) => info,
            Err(err) => return writeln!(output, "{}", Self::reply_file(&err)),
        };

        let extents: Vec<String> = info
            .extents
            .iter()
            .map(|extent| format!("{}:{}", extent.start, extent.count))
            .collect();
        let clusters: Vec<String> = info.clusters.iter().map(i32::to_string).collect();

        writeln!(output, "{:>12}: {}", "Name", info.name)?;
        writeln!(output, "{:>12}: {}", "Uid", info.uid)?;
        writeln!(
            output,
            "{:>12}: {}",
            "Type",
            if info.is_directory { "directory" } else { "file" }
        )?;
        writeln!(output, "{:>12}: {}", "Size", info.size)?;
        writeln!(output, "{:>12}: {}", "Extents", extents.join(" "))?;
        writeln!(output, "{:>12}: {}", "Clusters", clusters.join(" "))
    }

    fn cmd_cat<W: Write>(&self, args: &[&str], output: &mut W) -> io::Result<()> {
        let Some(path) = args.get(1) else {
            return writeln!(output, "ERROR: path of the file not given");
        };
        match self.volume.cat(path, output) {
            Ok(()) => writeln!(output),
            Err(err) => writeln!(output, "{}", Self::reply_file(&err)),
        }
    }

    fn cmd_mkdir<W: Write>(&mut self, args: &[&str], output: &mut W) -> io::Result<()> {
        let Some(path) = args.get(1) else {
            return writeln!(output, "ERROR: path of the directory not given");
        };
        match self.volume.mkdir(path) {
            Ok(()) => writeln!(output, "OK"),
            Err(err) => writeln!(output, "{}", Self::reply_dir(&err)),
        }
    }

    fn cmd_rmdir<W: Write>(&mut self, args: &[&str], output: &mut W) -> io::Result<()> {
        let Some(path) = args.get(1) else {
            return writeln!(output, "ERROR: path of the directory not given");
        };
        match self.volume.rmdir(path) {
            Ok(()) => writeln!(output, "OK"),
            Err(err) => writeln!(output, "{}", Self::reply_dir(&err)),
        }
    }

    fn cmd_incp<W: Write>(&mut self, args: &[&str], output: &mut W) -> io::Result<()> {
        let (Some(host_path), Some(fs_path)) = (args.get(1), args.get(2)) else {
            return writeln!(output, "ERROR: source and destination paths not given");
        };

        let file = match File::open(host_path) {
            Ok(file) => file,
            Err(_) => return writeln!(output, "FILE NOT FOUND"),
        };
        let len = match file.metadata() {
            Ok(metadata) if metadata.len() <= i32::MAX as u64 => metadata.len() as i32,
            Ok(_) => return writeln!(output, "ERROR: the file is too big for the partition"),
            Err(_) => return writeln!(output, "FILE NOT FOUND"),
        };

        let mut reader = BufReader::new(file);
        match self.volume.mkfile(fs_path, &mut reader, len) {
            Ok(()) => writeln!(output, "OK"),
            Err(err) => writeln!(output, "{}", Self::reply_transfer(&err)),
        }
    }

    fn cmd_outcp<W: Write>(&mut self, args: &[&str], output: &mut W) -> io::Result<()> {
        let (Some(fs_path), Some(host_path)) = (args.get(1), args.get(2)) else {
            return writeln!(output, "ERROR: source and destination paths not given");
        };

        // resolve the source first so nothing is created on the host for a
        // missing or non-file source
        match self.volume.resolve(fs_path) {
            Ok(node) if !node.is_directory() => {}
            _ => return writeln!(output, "FILE NOT FOUND"),
        }

        let file = match File::create(host_path) {
            Ok(file) => file,
            Err(_) => return writeln!(output, "PATH NOT FOUND"),
        };
        let mut writer = BufWriter::new(file);

        match self.volume.cat(fs_path, &mut writer) {
            Ok(()) => {
                writer.flush()?;
                writeln!(output, "OK")
            }
            Err(err) => writeln!(output, "{}", Self::reply_file(&err)),
        }
    }

    fn cmd_rm<W: Write>(&mut self, args: &[&str], output: &mut W) -> io::Result<()> {
        let Some(path) = args.get(1) else {
            return writeln!(output, "ERROR: path of the file not given");
        };
        match self.volume.rm(path) {
            Ok(()) => writeln!(output, "OK"),
            Err(err) => writeln!(output, "{}", Self::reply_file(&err)),
        }
    }

    fn cmd_mv<W: Write>(&mut self, args: &[&str], output: &mut W) -> io::Result<()> {
        let (Some(src), Some(dst)) = (args.get(1), args.get(2)) else {
            return writeln!(output, "ERROR: source and destination paths not given");
        };
        match self.volume.mv(src, dst) {
            Ok(()) => writeln!(output, "OK"),
            Err(err) => writeln!(output, "{}", Self::reply_transfer(&err)),
        }
    }

    fn cmd_cp<W: Write>(&mut self, args: &[&str], output: &mut W) -> io::Result<()> {
        let (Some(src), Some(dst)) = (args.get(1), args.get(2)) else {
            return writeln!(output, "ERROR: source and destination paths not given");
        };
        match self.volume.cp(src, dst) {
            Ok(()) => writeln!(output, "OK"),
            Err(err) => writeln!(output, "{}", Self::reply_transfer(&err)),
        }
    }

    // --- printers ---

    fn cmd_bootrecord<W: Write>(&self, output: &mut W) -> io::Result<()> {
        let boot = match self.volume.image().boot_record() {
            Ok(boot) => boot,
            Err(err) => return writeln!(output, "ERROR: {err}"),
        };

        writeln!(output, "{}", hline())?;
        writeln!(output, "{:>21}: {}", "Signature", boot.signature_str())?;
        writeln!(output, "{:>21}: {}", "Description", boot.description_str())?;
        writeln!(output, "{:>21}: {}", "Partition size", boot.partition_size)?;
        writeln!(output, "{:>21}: {}", "Cluster size", boot.cluster_size)?;
        writeln!(output, "{:>21}: {}", "Cluster count", boot.cluster_count)?;
        writeln!(output, "{:>21}: {}", "Mft entry count", boot.mft_entry_count())?;
        writeln!(output, "{:>21}: {}", "Mft start address", boot.mft_start)?;
        writeln!(output, "{:>21}: {}", "Bitmap start address", boot.bitmap_start)?;
        writeln!(output, "{:>21}: {}", "Data start address", boot.data_start)?;
        writeln!(output, "{:>21}: {}", "Max extents per entry", boot.max_extents_per_entry)?;
        writeln!(output, "{}", hline())
    }

    fn cmd_mft<W: Write>(&self, args: &[&str], output: &mut W) -> io::Result<()> {
        let print_all = args.get(1) == Some(&"all");
        let image = self.volume.image();
        let entry_count = match image.mft_entry_count() {
            Ok(count) => count,
            Err(err) => return writeln!(output, "ERROR: {err}"),
        };

        writeln!(output, "{}", hline())?;
        writeln!(
            output,
            "{:>10}|{:>10}|{:>3}|{:>12}|{:>10}|{:>5}|{:>5}",
            "index", "uid", "d/f", "name", "size", "order", "count"
        )?;
        writeln!(output, "{}", hline())?;

        for index in 0..entry_count {
            let slot = match image.read_entry(index) {
                Ok(slot) => slot,
                Err(err) => return writeln!(output, "ERROR: {err}"),
            };
            if slot.entry.is_free() && !print_all {
                continue;
            }

            let entry = &slot.entry;
            writeln!(
                output,
                "{:>10}|{:>10}|{:>3}|{:>12}|{:>10}|{:>5}|{:>5}",
                index,
                entry.uid,
                if entry.is_directory { "D" } else { "F" },
                entry.name_str(),
                entry.size,
                entry.order,
                entry.count
            )?;
        }
        writeln!(output, "{}", hline())
    }

    fn cmd_bitmap<W: Write>(&self, output: &mut W) -> io::Result<()> {
        let image = self.volume.image();
        let cluster_count = match image.cluster_count() {
            Ok(count) => count,
            Err(err) => return writeln!(output, "ERROR: {err}"),
        };

        writeln!(output, "{}", hline())?;
        write!(output, "{:>5}|", "_")?;
        for column in 0..10 {
            write!(output, "{column} ")?;
        }
        writeln!(output)?;

        let mut index = 0;
        while index < cluster_count {
            write!(output, "{index:>5} ")?;
            for _ in 0..10 {
                if index >= cluster_count {
                    break;
                }
                let bit = match image.read_bit(index) {
                    Ok(bit) => bit,
                    Err(err) => return writeln!(output, "ERROR: {err}"),
                };
                write!(output, "{} ", bit as u8)?;
                index += 1;
            }
            writeln!(output)?;
        }
        writeln!(output, "{}", hline())
    }

    fn cmd_check<W: Write>(&self, output: &mut W) -> io::Result<()> {
        // the size checker fans out over threads, so collect the warnings
        // in a buffer instead of demanding a Send sink from the caller
        let mut report = Vec::new();
        match check::check_all(self.volume.image(), self.check_workers, &mut report) {
            Ok(_) => output.write_all(&report),
            Err(err) => {
                output.write_all(&report)?;
                writeln!(output, "ERROR: {err}")
            }
        }
    }
}

fn hline() -> String {
    "-".repeat(HLINE_WIDTH)
}

/// Parse a partition size argument: digits with an optional decimal
/// suffix, `K` for 10^3, `M` for 10^6, `G` for 10^9.
fn parse_size(arg: &str) -> Result<i32, String> {
    let (digits, multiplier) = match arg.chars().last() {
        Some('K') => (&arg[..arg.len() - 1], 1_000i64),
        Some('M') => (&arg[..arg.len() - 1], 1_000_000),
        Some('G') => (&arg[..arg.len() - 1], 1_000_000_000),
        _ => (arg, 1),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err("size is in bad format".into());
    }
    let value: i64 = digits.parse().map_err(|_| "size is too big".to_string())?;

    let size = value * multiplier;
    if size > i32::MAX as i64 {
        return Err("size is too big".into());
    }
    Ok(size as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;
    use crate::image::Image;
    use crate::manager::NodeManager;

    fn shell() -> Shell<MemDisk> {
        let image = Image::open(MemDisk::new()).unwrap();
        let volume = Volume::new(NodeManager::with_seed(image, 5));
        Shell::new(volume, "alice".into(), "demo".into(), 2)
    }

    fn run_script(shell: &mut Shell<MemDisk>, script: &str) -> String {
        let mut output = Vec::new();
        for line in script.lines() {
            shell.handle(line, &mut output).unwrap();
        }
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn test_parse_size_suffixes() {
        assert_eq!(parse_size("600000").unwrap(), 600_000);
        assert_eq!(parse_size("600K").unwrap(), 600_000);
        assert_eq!(parse_size("2M").unwrap(), 2_000_000);
        assert_eq!(parse_size("1G").unwrap(), 1_000_000_000);
        assert!(parse_size("3G").is_err());
        assert!(parse_size("K").is_err());
        assert!(parse_size("12X").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn test_opened_before_and_after_format() {
        let mut shell = shell();
        let out = run_script(&mut shell, "opened\nformat 600K\nopened");
        assert_eq!(out, "NO\nOK\nYES\n");
    }

    #[test]
    fn test_unknown_command() {
        let mut shell = shell();
        let out = run_script(&mut shell, "frobnicate");
        assert_eq!(out, "UNKNOWN COMMAND\n");
    }

    #[test]
    fn test_format_too_small_cannot_create() {
        let mut shell = shell();
        let out = run_script(&mut shell, "format 1K");
        assert_eq!(out, "CANNOT CREATE FILE\n");
    }

    #[test]
    fn test_mkdir_ls_flow() {
        let mut shell = shell();
        let out = run_script(
            &mut shell,
            "format 600K\nmkdir /a\nmkdir /a/b\nls /a\nmkdir /a\nmkdir /x/y",
        );
        assert_eq!(out, "OK\nOK\nOK\n+b\nEXISTS\nPATH NOT FOUND\n");
    }

    #[test]
    fn test_pwd_and_cd_replies() {
        let mut shell = shell();
        let out = run_script(
            &mut shell,
            "format 600K\nmkdir /a\ncd /a\npwd\ncd /nope\ncd ..\npwd",
        );
        assert_eq!(out, "OK\nOK\n/a/\nPATH NOT FOUND\n/\n");
    }

    #[test]
    fn test_rmdir_replies() {
        let mut shell = shell();
        let out = run_script(
            &mut shell,
            "format 600K\nmkdir /a\nmkdir /a/b\nrmdir /a\nrmdir /a/b\nrmdir /a",
        );
        assert_eq!(out, "OK\nOK\nOK\nNOT EMPTY\nOK\nOK\n");
    }

    #[test]
    fn test_cat_and_rm_missing_file() {
        let mut shell = shell();
        let out = run_script(&mut shell, "format 600K\ncat /f\nrm /f\ninfo /f");
        assert_eq!(out, "OK\nFILE NOT FOUND\nFILE NOT FOUND\nFILE NOT FOUND\n");
    }

    #[test]
    fn test_check_is_silent_on_fresh_image() {
        let mut shell = shell();
        let out = run_script(&mut shell, "format 600K\nmkdir /a\ncheck");
        assert_eq!(out, "OK\nOK\n");
    }

    #[test]
    fn test_bootrecord_prints_computed_values() {
        let mut shell = shell();
        let out = run_script(&mut shell, "format 600K\nbootrecord");
        assert!(out.contains("Signature: alice"));
        assert!(out.contains("Description: demo"));
        assert!(out.contains("Cluster count: 527"));
        assert!(out.contains("Mft entry count: 210"));
    }

    #[test]
    fn test_exit_stops_the_loop() {
        let mut shell = shell();
        let mut output = Vec::new();
        assert!(!shell.handle("exit", &mut output).unwrap());
        assert!(shell.handle("opened", &mut output).unwrap());
    }
}
