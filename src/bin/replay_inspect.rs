//! Dumps a replay log's header, per-tag event counts, and snapshot
//! index as JSON. Companion binary to the library, same role as the
//! teacher's own `src/bin` demo — a small standalone tool driven from
//! the command line rather than library code exercised only by tests.

use std::collections::BTreeMap;
use std::env;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::process::ExitCode;

use replaycore::codec::Codec;
use replaycore::snapshot::{HEADER_LEN, LogHeader, SnapshotIndex};
use replaycore::wire::{tag, AsyncKind, ClockKind};

fn main() -> ExitCode {
    env_logger::init();

    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: replay_inspect <log-file>");
        return ExitCode::FAILURE;
    };

    match inspect(&path) {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report).unwrap());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("failed to inspect {path}: {e}");
            ExitCode::FAILURE
        }
    }
}

#[derive(serde::Serialize)]
struct Report {
    version: u32,
    tail_offset: u64,
    event_counts: BTreeMap<String, u64>,
    snapshot_count: usize,
    snapshots: Vec<SnapshotEntryReport>,
}

#[derive(serde::Serialize)]
struct SnapshotEntryReport {
    offset: u64,
    step: u64,
}

fn inspect(path: &str) -> replaycore::Result<Report> {
    let file = File::open(path)?;
    let mut codec = Codec::new(BufReader::new(file));
    let header = LogHeader::read(&mut codec)?;

    let event_counts = tally_events(&mut codec, header.tail_offset)?;

    codec.seek(header.tail_offset)?;
    let index = SnapshotIndex::read(&mut codec)?;

    let snapshots = index
        .entries()
        .iter()
        .map(|e| SnapshotEntryReport {
            offset: e.offset,
            step: e.step,
        })
        .collect();

    Ok(Report {
        version: header.version,
        tail_offset: header.tail_offset,
        event_counts,
        snapshot_count: index.len(),
        snapshots,
    })
}

/// Walks the event stream between the header and the snapshot tail
/// table, tallying each tag by name. This only needs to know the byte
/// width of each tag's payload well enough to skip past it — it never
/// needs to correlate async events against live collaborator state the
/// way `queue::AsyncQueue::read` does, since nothing here is dispatched.
fn tally_events<S: Read + Seek>(
    codec: &mut Codec<S>,
    tail_offset: u64,
) -> replaycore::Result<BTreeMap<String, u64>> {
    codec.seek(HEADER_LEN)?;
    let mut counts = BTreeMap::new();

    while codec.position()? < tail_offset {
        let t = codec.get_byte()?;
        let label = skip_event_payload(codec, t)?;
        *counts.entry(label).or_insert(0) += 1;
    }

    Ok(counts)
}

fn skip_event_payload<S: Read>(codec: &mut Codec<S>, t: u8) -> replaycore::Result<String> {
    match t {
        tag::END_STARTUP => Ok("END_STARTUP".to_string()),
        tag::TIME_T => {
            codec.get_qword()?;
            Ok("TIME_T".to_string())
        }
        tag::TM => {
            for _ in 0..9 {
                codec.get_i32()?;
            }
            Ok("TM".to_string())
        }
        tag::SOUND_OUT => Ok("SOUND_OUT".to_string()),
        tag::SOUND_IN => Ok("SOUND_IN".to_string()),
        tag::INTERRUPT => Ok("INTERRUPT".to_string()),
        tag::SHUTDOWN => Ok("SHUTDOWN".to_string()),
        tag::SAVE_VM_BEGIN => Ok("SAVE_VM_BEGIN".to_string()),
        tag::SAVE_VM_END => Ok("SAVE_VM_END".to_string()),
        tag::EXCEPTION => Ok("EXCEPTION".to_string()),
        tag::ASYNC | tag::ASYNC_OPT => {
            if t == tag::ASYNC_OPT {
                codec.get_byte()?; // checkpoint id this event is tagged for
            }
            let kind_byte = codec.get_byte()?;
            let kind = AsyncKind::from_byte(kind_byte).ok_or(
                replaycore::ReplayError::UnknownAsync {
                    kind: kind_byte,
                    step: 0,
                },
            )?;
            skip_async_payload(codec, kind)?;
            Ok(format!("ASYNC:{kind:?}"))
        }
        tag::INSTRUCTION => {
            codec.get_dword()?;
            Ok("INSTRUCTION".to_string())
        }
        tag::END => Ok("END".to_string()),
        t if t >= tag::CLOCK && (t - tag::CLOCK) < ClockKind::COUNT as u8 => {
            codec.get_qword()?;
            Ok("CLOCK".to_string())
        }
        t if t >= tag::CHECKPOINT && t < tag::END => Ok("CHECKPOINT".to_string()),
        other => Err(replaycore::ReplayError::UnexpectedKind {
            expected: tag::END,
            found: other,
            step: 0,
        }),
    }
}

fn skip_async_payload<S: Read>(codec: &mut Codec<S>, kind: AsyncKind) -> replaycore::Result<()> {
    match kind {
        AsyncKind::Bh | AsyncKind::Thread => {
            codec.get_qword()?;
        }
        AsyncKind::Input => {
            let input_kind = codec.get_dword()?;
            match input_kind {
                0 => {
                    // Key { value, down }: value is itself tagged.
                    let value_kind = codec.get_dword()?;
                    if value_kind == 0 {
                        codec.get_qword()?; // KeyValue::Number
                    } else {
                        codec.get_dword()?; // KeyValue::QCode
                    }
                    codec.get_byte()?; // down
                }
                1 => {
                    // Btn { button, down }
                    codec.get_dword()?;
                    codec.get_byte()?;
                }
                _ => {
                    // Rel/Abs { axis, value }
                    codec.get_dword()?;
                    codec.get_qword()?;
                }
            }
        }
        AsyncKind::InputSync => {}
        AsyncKind::Network => {
            codec.get_qword()?;
            codec.get_dword()?;
            codec.get_array_alloc()?;
        }
        AsyncKind::Char => {
            codec.get_byte()?;
            codec.get_array_alloc()?;
        }
        AsyncKind::UsbCtrl | AsyncKind::UsbData => {
            codec.get_qword()?; // id
            codec.get_dword()?; // status
            codec.get_dword()?; // actual_length
            let dir = codec.get_byte()?;
            if dir != 0 {
                codec.get_array_alloc()?;
            }
        }
        AsyncKind::UsbIso => {
            codec.get_qword()?; // id
            codec.get_dword()?; // status
            let buffer_count = codec.get_dword()?;
            let dir = codec.get_byte()?;
            if dir != 0 {
                for _ in 0..buffer_count {
                    codec.get_array_alloc()?;
                }
            }
        }
    }
    Ok(())
}
