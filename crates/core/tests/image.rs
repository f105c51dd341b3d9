mod common;

use std::fs;

use common::*;
use kcfp_core::codec::Op;
use kcfp_core::image::{ImageAccessor, ImageSnapshot, ImageTarget};
use kcfp_core::services::{self, InstrumentRequest};
use kcfp_core::CfpError;

#[test]
fn snapshot_reads_little_endian_words() {
    let snapshot = ImageSnapshot::from_bytes("mem", vec![0x1f, 0x20, 0x03, 0xd5, 0xc0]);
    assert_eq!(snapshot.word_at(0), Some(NOP));
    assert_eq!(snapshot.word_at(1), Some(0xc0d5_0320));
    assert_eq!(snapshot.word_at(2), None);
    assert_eq!(snapshot.path().to_str(), Some("mem"));
}

#[test]
fn snapshot_decodes_corpus_lines() {
    let fx = FixtureBuilder::new().function("f", &framed()).build();
    let snapshot = ImageSnapshot::open(&fx.image).expect("open");

    assert_eq!(snapshot.read_line(&fx.corpus, fx.line("f", 1)).expect("read"), STP_FRAME_PRE);
    let insn = snapshot.decode_line(&fx.corpus, fx.line("f", 6)).expect("decode");
    assert_eq!(insn.op, Op::Ret { rn: 30 });
    assert_eq!(insn.address, fx.address("f", 6));
}

#[test]
fn copy_target_leaves_original_untouched() {
    let fx = FixtureBuilder::new().function("f", &framed()).build();
    let out = fx.path("copy.img");
    let snapshot = ImageSnapshot::open(&fx.image).expect("open");
    let mut accessor =
        ImageAccessor::open(&fx.corpus, snapshot, &ImageTarget::Copy(out.clone())).expect("accessor");

    let line = fx.line("f", 0);
    assert_eq!(accessor.offset_of(line).expect("offset"), fx.offset("f", 0));
    accessor.write_word(line, MAGIC).expect("write");
    accessor.flush().expect("flush");

    // Reads come from the pristine snapshot, not the working copy.
    assert_eq!(accessor.read_word(line).expect("read"), NOP);
    assert!(accessor.decode(line).expect("decode").is_nop());
    assert_eq!(accessor.target_path(), out.as_path());
    drop(accessor);

    assert_eq!(fx.word_in(&out, "f", 0), MAGIC);
    assert_eq!(fx.word_in(&fx.image, "f", 0), NOP);
}

#[test]
fn copy_onto_the_source_is_rejected() {
    let fx = FixtureBuilder::new().function("f", &framed()).build();
    let before = fs::read(&fx.image).expect("read");
    let aliased = fx.dir.path().join(".").join("vmlinux");
    assert_eq!(aliased.canonicalize().expect("canon"), fx.image.canonicalize().expect("canon"));

    let snapshot = ImageSnapshot::open(&fx.image).expect("open");
    let err = ImageAccessor::open(&fx.corpus, snapshot, &ImageTarget::Copy(aliased))
        .expect_err("same file");
    assert!(matches!(err, CfpError::Io { .. }));
    assert!(err.to_string().contains("in-place"));
    assert_eq!(fs::read(&fx.image).expect("read"), before);
}

#[test]
fn run_with_output_naming_the_image_leaves_it_intact() {
    let fx = FixtureBuilder::new().function("f", &framed()).build();
    let before = fs::read(&fx.image).expect("read");

    let request = InstrumentRequest {
        target: ImageTarget::Copy(fx.image.clone()),
        ..InstrumentRequest::new(&fx.image, ropp())
    };
    assert!(matches!(services::instrument(&fx.corpus, &request), Err(CfpError::Io { .. })));
    assert_eq!(fs::read(&fx.image).expect("read"), before);
}

#[test]
fn in_place_target_patches_source() {
    let fx = FixtureBuilder::new().function("f", &framed()).build();
    let snapshot = ImageSnapshot::open(&fx.image).expect("open");
    let mut accessor =
        ImageAccessor::open(&fx.corpus, snapshot, &ImageTarget::InPlace).expect("accessor");

    accessor.write_word(fx.line("f", 2), NOP).expect("write");
    accessor.flush().expect("flush");
    let pristine = accessor.into_pristine();

    assert_eq!(fx.word_in(&fx.image, "f", 2), NOP);
    assert_eq!(pristine.word_at(fx.offset("f", 2)), Some(MOV_FP_SP));
}

#[test]
fn write_past_end_of_image_is_rejected() {
    let fx = FixtureBuilder::new().function("f", &framed()).build();
    let short = fx.path("short.img");
    let bytes = fs::read(&fx.image).expect("read");
    fs::write(&short, &bytes[..fx.offset("f", 3) as usize]).expect("write short");

    let snapshot = ImageSnapshot::open(&short).expect("open");
    assert!(matches!(
        snapshot.read_line(&fx.corpus, fx.line("f", 5)),
        Err(CfpError::MalformedInput { .. })
    ));

    let mut accessor =
        ImageAccessor::open(&fx.corpus, snapshot, &ImageTarget::InPlace).expect("accessor");
    assert!(matches!(
        accessor.write_word(fx.line("f", 5), NOP),
        Err(CfpError::MalformedInput { .. })
    ));
    drop(accessor);
    assert_eq!(fs::metadata(&short).expect("meta").len(), fx.offset("f", 3));
}

#[test]
fn missing_image_is_an_io_error() {
    let fx = FixtureBuilder::new().function("f", &[RET]).build();
    assert!(matches!(ImageSnapshot::open(fx.path("absent")), Err(CfpError::Io { .. })));
}
