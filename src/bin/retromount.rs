/// Interactive console for mounted disk images

use retromount::map::{render_allocation, render_health, render_usage};
use retromount::*;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};

const DEFAULT_MAP_WIDTH: usize = 64;

/// Command completer for the REPL
struct CommandCompleter {
    commands: Vec<&'static str>,
}

impl CommandCompleter {
    fn new() -> Self {
        Self {
            commands: vec![
                "ascii",
                "check",
                "chs",
                "devices",
                "exit",
                "geometry",
                "help",
                "info",
                "map",
                "mount",
                "next",
                "protect",
                "quit",
                "read-block",
                "rectify",
                "revert",
                "save",
                "scan",
                "type",
                "unmount",
                "volume",
                "write-byte",
            ],
        }
    }
}

impl Completer for CommandCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        // Only complete the first word (command name)
        let line_to_cursor = &line[..pos];
        if line_to_cursor.contains(' ') {
            return Ok((pos, vec![]));
        }

        let prefix = line_to_cursor.to_lowercase();
        let matches: Vec<Pair> = self
            .commands
            .iter()
            .filter(|cmd| cmd.starts_with(&prefix))
            .map(|cmd| Pair {
                display: cmd.to_string(),
                replacement: cmd.to_string(),
            })
            .collect();

        Ok((0, matches))
    }
}

impl Hinter for CommandCompleter {
    type Hint = String;
}

impl Highlighter for CommandCompleter {}
impl Validator for CommandCompleter {}
impl Helper for CommandCompleter {}

/// Get the path to the history file
fn history_path() -> Option<std::path::PathBuf> {
    dirs::home_dir().map(|mut p| {
        p.push(".retromount_history");
        p
    })
}

/// Set up logging from the command line flags, honouring RUST_LOG
fn init_logging(args: &[String]) {
    let level = if args.iter().any(|a| a == "--debug") {
        "debug"
    } else if args.iter().any(|a| a == "-v" || a == "--verbose") {
        "info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    init_logging(&args);

    println!("=== RetroMount ===");
    println!("Interactive console for mounting and checking retro disk images.");
    println!("Type 'help' for available commands\n");

    let mut registry = match DeviceRegistry::new(RegistryConfig::from_env()) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let mut current: Option<VolumeHandle> = None;

    for path in args.iter().filter(|a| !a.starts_with('-')) {
        mount(&mut registry, &mut current, path);
    }

    let mut rl = match Editor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    rl.set_helper(Some(CommandCompleter::new()));

    // Load history if available
    if let Some(history_path) = history_path() {
        let _ = rl.load_history(&history_path);
    }

    loop {
        let readline = rl.readline("> ");
        let input = match readline {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        };

        // Bridge events arrive between commands
        for event in registry.poll_events() {
            println!("Bridge: volume {}:{} {:?}", event.device, event.partition, event.kind);
        }
        if let Some(vh) = current {
            if registry.volume(vh).is_err() {
                current = None;
            }
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        let parts = parse_command_line(input);
        if parts.is_empty() {
            continue;
        }
        let command = parts[0].to_lowercase();

        match command.as_str() {
            "help" => print_help(),
            "quit" | "exit" => break,
            "mount" => {
                if parts.len() < 2 {
                    println!("Usage: mount <path>");
                    continue;
                }
                mount(&mut registry, &mut current, &parts[1]);
            }
            "unmount" => {
                let target = match parts.get(1) {
                    Some(arg) => arg.parse().ok().and_then(|slot| registry.find(slot)).map(|d| {
                        VolumeHandle::new(d, parts.get(2).and_then(|p| p.parse().ok()).unwrap_or(0))
                    }),
                    None => current,
                };
                match target {
                    Some(vh) => {
                        let partition = parts.get(2).map(|_| vh.partition);
                        registry.unmount(vh.device, partition);
                        println!("Unmounted device {}", vh.device);
                        if current.is_some_and(|c| registry.volume(c).is_err()) {
                            current = None;
                        }
                    }
                    None => println!("No such device."),
                }
            }
            "devices" => list_devices(&registry, current),
            "info" => {
                let device = match parts.get(1) {
                    Some(arg) => arg.parse().ok().and_then(|slot| registry.find(slot)),
                    None => current.map(|vh| vh.device),
                };
                match device.map(|d| registry.info(d)) {
                    Some(Ok(info)) => print_device_info(&info),
                    Some(Err(e)) => println!("Error: {}", e),
                    None => println!("No device selected. Use 'mount <path>' first."),
                }
            }
            "volume" => {
                if parts.len() >= 2 {
                    let selected = parts[1].parse().ok().and_then(|slot| registry.find(slot)).map(|d| {
                        VolumeHandle::new(d, parts.get(2).and_then(|p| p.parse().ok()).unwrap_or(0))
                    });
                    match selected {
                        Some(vh) if registry.volume(vh).is_ok() => current = Some(vh),
                        _ => {
                            println!("No such volume.");
                            continue;
                        }
                    }
                }
                let Some(vh) = current else {
                    println!("No volume selected.");
                    continue;
                };
                match registry.volume_info(vh) {
                    Ok(info) => print_volume_info(vh, &info),
                    Err(e) => println!("Error: {}", e),
                }
            }
            "geometry" => {
                let Some(vh) = current else {
                    println!("No volume selected.");
                    continue;
                };
                match registry.geometry(vh.device) {
                    Ok(geometry) => print_geometry(&geometry),
                    Err(e) => println!("Error: {}", e),
                }
            }
            "chs" => {
                let Some(vh) = current else {
                    println!("No volume selected.");
                    continue;
                };
                let geometry = match registry.geometry(vh.device) {
                    Ok(geometry) => geometry,
                    Err(e) => {
                        println!("Error: {}", e);
                        continue;
                    }
                };
                let numbers: Vec<u64> = parts[1..].iter().filter_map(|p| parse_number(p)).collect();
                match numbers.as_slice() {
                    [block] => match geometry.block_to_chs(*block) {
                        Ok(chs) => println!("Block {} = {}", block, chs),
                        Err(e) => println!("Error: {}", e),
                    },
                    [c, h, s] => match geometry.chs_to_block(*c as u32, *h as u32, *s as u32) {
                        Ok(block) => println!("{} = block {}", Chs::new(*c as u32, *h as u32, *s as u32), block),
                        Err(e) => println!("Error: {}", e),
                    },
                    _ => println!("Usage: chs <block> | chs <cylinder> <head> <sector>"),
                }
            }
            "read-block" => {
                let (Some(vh), Some(block)) = (current, parts.get(1).and_then(|p| parse_number(p))) else {
                    println!("Usage: read-block <block> (with a volume selected)");
                    continue;
                };
                match registry.volume(vh).and_then(|v| v.read_block(block)) {
                    Ok(data) => {
                        let kind = registry.type_of(vh, block).unwrap_or(BlockKind::Unclassified);
                        println!("Block {} ({}, {} bytes):", block, kind, data.len());
                        print_hex_dump(&data, 512);
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            "ascii" => {
                let (Some(vh), Some(block)) = (current, parts.get(1).and_then(|p| parse_number(p))) else {
                    println!("Usage: ascii <block> [offset] [length]");
                    continue;
                };
                let offset = parts.get(2).and_then(|p| parse_number(p)).unwrap_or(0) as usize;
                let result = registry.volume(vh).and_then(|v| {
                    let length = parts
                        .get(3)
                        .and_then(|p| parse_number(p))
                        .map(|l| l as usize)
                        .unwrap_or(v.block_size().saturating_sub(offset));
                    v.read_ascii(block, offset, length)
                });
                match result {
                    Ok(text) => {
                        for line in text.as_bytes().chunks(64) {
                            println!("{}", String::from_utf8_lossy(line));
                        }
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            "write-byte" => {
                let numbers: Vec<u64> = parts[1..].iter().filter_map(|p| parse_number(p)).collect();
                let (Some(vh), [block, offset, value]) = (current, numbers.as_slice()) else {
                    println!("Usage: write-byte <block> <offset> <value>");
                    continue;
                };
                if *value > 0xFF {
                    println!("Value must fit in a byte.");
                    continue;
                }
                match registry.volume(vh).and_then(|v| v.write_byte(*block, *offset as usize, *value as u8)) {
                    Ok(()) => println!("Wrote {:02X} to block {} offset {}", value, block, offset),
                    Err(e) => println!("Error: {}", e),
                }
            }
            "type" => {
                let (Some(vh), Some(block)) = (current, parts.get(1).and_then(|p| parse_number(p))) else {
                    println!("Usage: type <block>");
                    continue;
                };
                match registry.type_of(vh, block) {
                    Ok(kind) => println!("Block {}: {}", block, kind),
                    Err(e) => println!("Error: {}", e),
                }
            }
            "next" => {
                let (Some(vh), Some(kind)) = (current, parts.get(1).and_then(|p| parse_kind(p))) else {
                    println!("Usage: next <boot|root|bitmap|bitmap-ext|header|list|dir|data|empty> [after]");
                    continue;
                };
                let after = parts.get(2).and_then(|p| parse_number(p)).unwrap_or(0);
                match registry.next_block_of_type(vh, kind, after) {
                    Ok(Some(block)) => println!("Next {} block: {}", kind, block),
                    Ok(None) => println!("No {} blocks.", kind),
                    Err(e) => println!("Error: {}", e),
                }
            }
            "check" => {
                let (Some(vh), Some(block)) = (current, parts.get(1).and_then(|p| parse_number(p))) else {
                    println!("Usage: check <block> [strict]");
                    continue;
                };
                let strict = parts.get(2).is_some_and(|p| p == "strict");
                match registry.diagnose(vh, block, strict) {
                    Ok(Validation::Valid) => println!("Block {} is valid", block),
                    Ok(Validation::Invalid(reason)) => println!("Block {}: {}", block, reason),
                    Err(e) => println!("Error: {}", e),
                }
            }
            "scan" | "rectify" => {
                let Some(vh) = current else {
                    println!("No volume selected.");
                    continue;
                };
                let strict = parts.get(1).is_some_and(|p| p == "strict");
                let pending = if command == "scan" {
                    registry.spawn_scan(vh, strict)
                } else {
                    registry.spawn_rectify(vh, strict)
                };
                match pending.and_then(|p| p.wait()) {
                    Ok(result) => print_scan_result(&result),
                    Err(e) => println!("Error: {}", e),
                }
            }
            "map" => {
                let Some(vh) = current else {
                    println!("No volume selected.");
                    continue;
                };
                let width = parts.get(2).and_then(|p| p.parse().ok()).unwrap_or(DEFAULT_MAP_WIDTH);
                let rendered = match parts.get(1).map(String::as_str).unwrap_or("usage") {
                    "usage" => registry
                        .spawn_usage_map(vh, width)
                        .and_then(|p| p.wait())
                        .map(|m| render_usage(&m)),
                    "alloc" | "allocation" => registry.allocation_map(vh, width).map(|m| render_allocation(&m)),
                    "health" => registry.health_map(vh, width).map(|m| render_health(&m)),
                    other => {
                        println!("Unknown map '{}'. Use usage, alloc or health.", other);
                        continue;
                    }
                };
                match rendered {
                    Ok(text) => {
                        if let Ok(result) = registry.scan_result(vh) {
                            if registry.volume(vh).is_ok_and(|v| result.is_stale(&v)) {
                                println!("(scan result is out of date, run 'scan' again)");
                            }
                        }
                        println!("{}", text);
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            "protect" => {
                let Some(vh) = current else {
                    println!("No volume selected.");
                    continue;
                };
                let result = match parts.get(1).map(String::as_str) {
                    Some("on") => registry.set_write_protected(vh, true).map(|_| true),
                    Some("off") => registry.set_write_protected(vh, false).map(|_| false),
                    _ => registry.toggle_write_protected(vh),
                };
                match result {
                    Ok(true) => println!("Volume is write protected"),
                    Ok(false) => println!("Volume is writable"),
                    Err(e) => println!("Error: {}", e),
                }
            }
            "save" => {
                let Some(vh) = current else {
                    println!("No volume selected.");
                    continue;
                };
                let result = match parts.get(1) {
                    Some(path) => registry.save_as(vh.device, path),
                    None => registry.save(vh.device),
                };
                match result {
                    Ok(()) => println!("Saved."),
                    Err(e) => println!("Error: {}", e),
                }
            }
            "revert" => {
                let Some(vh) = current else {
                    println!("No volume selected.");
                    continue;
                };
                match registry.revert(vh.device) {
                    Ok(()) => println!("Reverted to the file on disk."),
                    Err(e) => println!("Error: {}", e),
                }
            }
            _ => {
                println!("Unknown command: {}. Type 'help' for available commands.", command);
            }
        }
    }

    // Save history before exiting
    if let Some(history_path) = history_path() {
        let _ = rl.save_history(&history_path);
    }
    registry.unmount_all();
    println!("Goodbye!");
}

fn mount(registry: &mut DeviceRegistry, current: &mut Option<VolumeHandle>, path: &str) {
    match registry.mount(path) {
        Ok(device) => {
            println!("Mounted {} as device {}", path, device);
            if let Ok(volumes) = registry.volumes(device) {
                *current = volumes.first().copied();
            }
        }
        Err(e) => println!("Error: {}", e),
    }
}

/// Parse command line input, respecting quoted strings
fn parse_command_line(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in input.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
            }
            ' ' | '\t' if !in_quotes => {
                if !current.is_empty() {
                    parts.push(current.clone());
                    current.clear();
                }
            }
            _ => {
                current.push(ch);
            }
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

fn parse_number(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn parse_kind(s: &str) -> Option<BlockKind> {
    Some(match s.to_lowercase().as_str() {
        "empty" => BlockKind::Unclassified,
        "boot" => BlockKind::Boot,
        "root" => BlockKind::Root,
        "bitmap" => BlockKind::Bitmap,
        "bitmap-ext" => BlockKind::BitmapExt,
        "header" => BlockKind::FileHeader,
        "list" => BlockKind::FileList,
        "dir" => BlockKind::UserDir,
        "data" => BlockKind::Data,
        _ => return None,
    })
}

fn print_help() {
    println!("Available commands:");
    println!("  mount <path>                   - Mount a disk image (use quotes for paths with spaces)");
    println!("  unmount [device] [partition]   - Unmount a volume, or the whole device");
    println!("  devices                        - List mounted devices");
    println!("  info [device]                  - Show device information");
    println!("  volume [device] [partition]    - Select a volume and show its information");
    println!("  geometry                       - Show the device geometry");
    println!("  chs <block> | <c> <h> <s>      - Convert between blocks and cylinder/head/sector");
    println!("  read-block <block>             - Hex dump a block");
    println!("  ascii <block> [offset] [len]   - Show block contents as text");
    println!("  write-byte <block> <off> <val> - Change a byte");
    println!("  type <block>                   - Show what a block holds");
    println!("  next <kind> [after]            - Find the next block of a kind");
    println!("  check <block> [strict]         - Validate one block and explain any damage");
    println!("  scan [strict]                  - Check the allocation bitmap and block structures");
    println!("  rectify [strict]               - Repair the allocation bitmap and rescan");
    println!("  map [usage|alloc|health] [w]   - Draw a block map (alloc/health need a scan)");
    println!("  protect [on|off]               - Toggle or set write protection");
    println!("  save [path]                    - Save the image (use quotes for paths with spaces)");
    println!("  revert                         - Discard unsaved changes");
    println!("  help                           - Show this help");
    println!("  quit, exit                     - Exit");
}

fn list_devices(registry: &DeviceRegistry, current: Option<VolumeHandle>) {
    let devices = registry.devices();
    if devices.is_empty() {
        println!("No devices mounted.");
        return;
    }
    for device in devices {
        let Ok(info) = registry.info(device) else {
            continue;
        };
        println!(
            "{:>3}  {:<24} {:<28} {:>10}",
            device,
            info.name(),
            info.description(),
            info.capacity_string()
        );
        for vh in registry.volumes(device).unwrap_or_default() {
            let Ok(volume) = registry.volume_info(vh) else {
                continue;
            };
            let marker = if Some(vh) == current { "*" } else { " " };
            println!(
                "   {} {:<3} {:<20} {:<8} {:>5}  {}",
                marker,
                vh.partition,
                volume.name,
                volume.filesystem,
                volume.fill_string(),
                volume
                    .mount_point
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not exposed)".to_string())
            );
        }
    }
}

fn print_device_info(info: &DeviceInfo) {
    println!("File: {}", info.path.display());
    println!("Type: {}", info.description());
    println!("Capacity: {} ({} blocks of {} bytes)", info.capacity_string(), info.num_blocks, info.block_size);
    println!("Cylinders: {}", info.cylinders);
    println!("Heads: {}", info.heads);
    if info.min_sectors == info.max_sectors {
        println!("Sectors per track: {}", info.min_sectors);
    } else {
        println!("Sectors per track: {} - {}", info.min_sectors, info.max_sectors);
    }
    println!("Volumes: {}", info.num_volumes);
    println!("Modified: {}", if info.modified { "yes" } else { "no" });
}

fn print_volume_info(vh: VolumeHandle, info: &VolumeInfo) {
    println!("Volume {}: {} ({})", vh, info.name, info.partition_name);
    println!("File system: {}", info.filesystem);
    println!("Capacity: {}", info.capacity_string());
    println!("Used: {} blocks, free: {} blocks ({} full)", info.used_blocks, info.free_blocks, info.fill_string());
    if info.created.is_some() {
        println!("Created: {}", info.created_string());
        println!("Modified: {}", info.modified_string());
    }
    if let Some(mount_point) = &info.mount_point {
        println!("Mount point: {}", mount_point.display());
    }
    println!("Reads: {} blocks ({} bytes)", info.blocks_read, info.bytes_read);
    println!("Writes: {} blocks ({} bytes)", info.blocks_written, info.bytes_written);
    println!("Cached: {} blocks, dirty: {} blocks", info.cached_blocks, info.dirty_blocks);
    println!("Generation: {}", info.generation);
    println!("Write protected: {}", if info.write_protected { "yes" } else { "no" });
}

fn print_geometry(geometry: &Geometry) {
    println!(
        "{} cylinders, {} heads, {} tracks, {} blocks",
        geometry.cylinders(),
        geometry.heads(),
        geometry.num_tracks(),
        geometry.num_blocks()
    );
    // Group runs of equal sector counts
    let mut start = 0;
    let table = geometry.sector_table();
    for i in 1..=table.len() {
        if i == table.len() || table[i] != table[start] {
            println!("  tracks {:>4} - {:<4} {} sectors", start, i - 1, table[start]);
            start = i;
        }
    }
}

fn print_scan_result(result: &ScanResult) {
    println!(
        "Scan ({}): {} corrupted, {} used but unallocated, {} unused but allocated",
        if result.strict { "strict" } else { "quick" },
        result.corrupted.len(),
        result.used_but_unallocated.len(),
        result.unused_but_allocated.len()
    );
    let show = |label: &str, blocks: &[u64]| {
        if !blocks.is_empty() {
            let list: Vec<String> = blocks.iter().take(32).map(|b| b.to_string()).collect();
            let more = if blocks.len() > 32 { " ..." } else { "" };
            println!("  {}: {}{}", label, list.join(", "), more);
        }
    };
    for (block, reason) in result.reasons.iter().take(32) {
        println!("  Block {}: {}", block, reason);
    }
    if result.reasons.len() > 32 {
        println!("  ... ({} more corrupted blocks)", result.reasons.len() - 32);
    }
    show("Used but unallocated", &result.used_but_unallocated);
    show("Unused but allocated", &result.unused_but_allocated);
    if result.is_clean() {
        println!("No problems found.");
    }
}

fn print_hex_dump(data: &[u8], max_bytes: usize) {
    let len = data.len().min(max_bytes);

    for (i, chunk) in data[..len].chunks(16).enumerate() {
        print!("{:04X}: ", i * 16);

        for (j, byte) in chunk.iter().enumerate() {
            print!("{:02X} ", byte);
            if j == 7 {
                print!(" ");
            }
        }

        // Pad if less than 16 bytes
        for j in chunk.len()..16 {
            print!("   ");
            if j == 7 {
                print!(" ");
            }
        }

        print!(" |");
        for byte in chunk {
            let c = if (32..127).contains(byte) { *byte as char } else { '.' };
            print!("{}", c);
        }
        println!("|");
    }

    if data.len() > max_bytes {
        println!("... ({} more bytes)", data.len() - max_bytes);
    }
}
