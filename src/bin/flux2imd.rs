/*
    flux2imd
    Copyright 2026 The flux2imd Contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/bin/flux2imd.rs

    The CLI front end: a thin wrapper over the library that resolves input
    files to a container kind, runs the decode pipeline, and writes the
    resulting image(s) next to the input, per spec.md SS6.
*/
use bpaf::Parser;
use flux2imd::chs::DiskCh;
use flux2imd::format::find_format;
use flux2imd::{image_writer, log_sink::LogSink, Flux2ImdError};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
struct Args {
    dump_sectors: bool,
    debug_level: Option<u32>,
    force_format: Option<String>,
    hard_sector_count: Option<u8>,
    print_sector_map: bool,
    files: Vec<PathBuf>,
}

fn args_parser() -> impl Parser<Args> {
    let dump_sectors = bpaf::long("binary").short('b').help("Dump decoded sector bytes to the log").switch();

    let debug_level = bpaf::long("debug")
        .short('d')
        .help("Enable debug logging; an optional hex mask selects subsystems")
        .argument::<String>("MASK")
        .optional()
        .map(|m| m.and_then(|s| u32::from_str_radix(s.trim_start_matches("0x"), 16).ok().or(Some(0xFFFF_FFFF))));

    let force_format =
        bpaf::long("format").short('g').help("Force a specific format name instead of auto-detecting").argument::<String>("NAME").optional();

    let hard_sector_count = bpaf::long("hard-sector")
        .short('h')
        .help("Treat the disk as hard-sectored with N sectors per track (16 or 32)")
        .argument::<u8>("N")
        .optional();

    let print_sector_map =
        bpaf::long("print-map").short('p').help("Print each track's sector id map to the log").switch();

    let files = bpaf::positional::<PathBuf>("FILE").help("Flux capture file(s) to decode (.raw, .scp, .zip)").many();

    bpaf::construct!(Args { dump_sectors, debug_level, force_format, hard_sector_count, print_sector_map, files })
}

fn container_kind(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase().as_str() {
        "scp" => "scp",
        "zip" => "zip",
        "raw" => "raw",
        _ => "unknown",
    }
}

fn process_file(args: &Args, path: &Path) -> flux2imd::Result<()> {
    let sink = LogSink::new(&path.display().to_string());
    let bytes = std::fs::read(path)?;
    let pinned = args.force_format.as_deref().and_then(find_format);

    let disk = match container_kind(path) {
        "scp" => flux2imd::decode_scp_disk(&bytes, pinned)?,
        #[cfg(feature = "zip")]
        "zip" => flux2imd::decode_kryoflux_zip_disk(&bytes, pinned)?,
        #[cfg(not(feature = "zip"))]
        "zip" => return Err(Flux2ImdError::UnsupportedContainer),
        "raw" => {
            let (track, format) = flux2imd::decode_kryoflux_raw_track(&bytes, DiskCh::new(0, 0), pinned, args.hard_sector_count)?;
            let mut disk = flux2imd::disk::Disk::new(format);
            disk.tracks.push(track);
            disk
        }
        _ => return Err(Flux2ImdError::UnsupportedContainer),
    };

    let summary = flux2imd::log_sink::DefectSummary::from_disk(&disk);
    summary.log(&sink);

    if args.print_sector_map {
        for track in disk.sorted_tracks() {
            let ids: Vec<u8> = track.sectors_in_id_order().iter().map(|s| s.id).collect();
            sink.with_track(track.ch).debug(&format!("sector map: {:?}", ids));
        }
    }
    if args.dump_sectors {
        for track in disk.sorted_tracks() {
            for sector in track.sectors_in_id_order() {
                sink.with_track(track.ch).debug(&format!("sector {}: {} bytes", sector.id, sector.data.len()));
            }
        }
    }

    if !disk.format.no_imd() {
        let imd_path = path.with_extension("imd");
        let mut out = std::fs::File::create(&imd_path)?;
        image_writer::write_imd(&mut out, &disk)?;
        sink.debug(&format!("wrote {}", imd_path.display()));
    }

    if !disk.format.no_imd() {
        let img_path = path.with_extension("img");
        let mut out = std::fs::File::create(&img_path)?;
        image_writer::write_img(&mut out, &disk)?;
        sink.debug(&format!("wrote {}", img_path.display()));
    }

    Ok(())
}

fn main() {
    let args = args_parser().to_options().descr("Decode vintage floppy flux captures to IMD/IMG images").run();

    let level = if args.debug_level.is_some() { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    env_logger::Builder::new().filter_level(level).init();

    let mut exit_code = 0;
    for path in &args.files {
        if let Err(err) = process_file(&args, path) {
            eprintln!("{}: {}", path.display(), err);
            exit_code = 1;
        }
    }
    std::process::exit(exit_code);
}
