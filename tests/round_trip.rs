use std::borrow::Cow;

use sambam::bam::cigar::PackedCigar;
use sambam::bam::sequence::PackedSequence;
use sambam::bam::tag::{Tag, TagValue};
use sambam::bgzf;
use sambam::{FileType, Reader, Record, RecordFlags, Reference, SbError, Writer};

fn references() -> Vec<Reference> {
    vec![
        Reference::new("chr1", 10_000, 0),
        Reference::new("chr2", 5_000, 1),
    ]
}

fn mapped(name: &'static [u8], position: i32) -> Record<'static> {
    let mut record = Record::default();
    record.reference_id = 0;
    record.position = position;
    record.mapping_quality = 60;
    record.flag = RecordFlags::MULTISEG.bits();
    record.name = Cow::Borrowed(name);
    record.cigar = PackedCigar::pack(&[(4, 0)]).unwrap();
    record.sequence = PackedSequence::from_text(b"ACGT").unwrap();
    record.quality_scores = Cow::Borrowed(&[30, 30, 30, 30]);
    record.next_reference_id = 1;
    record.next_position = 40;
    record.set_tags(vec![Tag {
        id: *b"NM",
        value: TagValue::Int8(0),
    }]);
    record
}

fn assert_same(a: &mut Record<'_>, b: &mut Record<'_>) {
    assert_eq!(a.name, b.name);
    assert_eq!(a.flag, b.flag);
    assert_eq!(a.reference_id, b.reference_id);
    assert_eq!(a.position, b.position);
    assert_eq!(a.mapping_quality, b.mapping_quality);
    assert_eq!(a.cigar.unpack(), b.cigar.unpack());
    assert_eq!(a.sequence.unpack(), b.sequence.unpack());
    assert_eq!(a.quality_scores, b.quality_scores);
    assert_eq!(a.next_reference_id, b.next_reference_id);
    assert_eq!(a.next_position, b.next_position);
    assert_eq!(a.template_length, b.template_length);
    assert_eq!(a.tags().unwrap(), b.tags().unwrap());
}

#[test]
fn bgzf_round_trip() -> Result<(), SbError> {
    let refs = references();
    let mut writer = Writer::bgzf(Vec::new(), b"@HD\tVN:1.6\n", &refs, None)?;
    writer.write_record(&mapped(b"r1", 10))?;
    writer.write_record(&mapped(b"r2", 20))?;
    writer.finalize()?;
    let wire = match writer {
        Writer::Bgzf(inner) => inner.into_inner()?,
        _ => unreachable!(),
    };
    assert!(wire.ends_with(&bgzf::EMPTY_BLOCK));

    let mut reader = Reader::from_slice(&wire)?;
    assert_eq!(reader.file_type(), FileType::Bgzf);
    assert_eq!(reader.references(), &refs[..]);
    assert!(reader.header_text().starts_with(b"@HD\tVN:1.6\n"));

    let mut decoded = reader.next_record()?.expect("first record").into_owned();
    assert_same(&mut decoded, &mut mapped(b"r1", 10));
    let mut decoded = reader.next_record()?.expect("second record").into_owned();
    assert_same(&mut decoded, &mut mapped(b"r2", 20));
    assert!(reader.next_record()?.is_none());
    Ok(())
}

#[test]
fn record_larger_than_a_block_is_reassembled() -> Result<(), SbError> {
    // the encoded record far exceeds one block's payload budget, so it is
    // split over several blocks and must come back contiguously
    let length = 70_000;
    let codes: Vec<u8> = (0..length).map(|i| (i % 15 + 1) as u8).collect();
    let mut record = Record::default();
    record.reference_id = 0;
    record.position = 1;
    record.name = Cow::Borrowed(b"long");
    record.cigar = PackedCigar::pack(&[(length as u32, 0)]).unwrap();
    record.sequence = PackedSequence::pack(&codes).unwrap();
    record.quality_scores = Cow::Owned(vec![40; length]);

    let refs = vec![Reference::new("chr1", 1_000_000, 0)];
    let mut writer = Writer::bgzf(Vec::new(), b"", &refs, None)?;
    writer.write_record(&record)?;
    writer.finalize()?;
    let wire = match writer {
        Writer::Bgzf(inner) => inner.into_inner()?,
        _ => unreachable!(),
    };
    // header block, at least two record blocks, sentinel
    assert!(wire.len() > bgzf::EMPTY_BLOCK.len() + 2 * 28);

    let mut reader = Reader::from_slice(&wire)?;
    let decoded = reader.next_record()?.expect("the long record");
    assert_eq!(decoded.name.as_ref(), b"long");
    assert_eq!(decoded.sequence.len(), length);
    assert_eq!(decoded.sequence.unpack(), codes);
    assert_eq!(decoded.quality_scores.len(), length);
    assert!(reader.next_record()?.is_none());
    Ok(())
}

#[test]
fn truncated_stream_still_yields_records() -> Result<(), SbError> {
    let refs = references();
    let mut writer = Writer::bgzf(Vec::new(), b"", &refs, None)?;
    writer.write_record(&mapped(b"r1", 10))?;
    writer.finish_block()?;
    let wire = match writer {
        Writer::Bgzf(inner) => inner.into_inner()?,
        _ => unreachable!(),
    };
    // drop the end-of-file sentinel
    let truncated = &wire[..wire.len() - bgzf::EMPTY_BLOCK.len()];

    let mut reader = Reader::from_slice(truncated)?;
    let record = reader.next_record()?.expect("the record survives");
    assert_eq!(record.name.as_ref(), b"r1");
    assert!(reader.next_record()?.is_none());
    Ok(())
}

#[test]
fn sam_to_bam_to_sam() -> Result<(), SbError> {
    let text = b"@HD\tVN:1.6\n\
        @SQ\tSN:chr1\tLN:10000\n\
        @SQ\tSN:chr2\tLN:5000\n\
        r1\t99\tchr1\t101\t60\t4M\tchr2\t41\t0\tACGT\t????\tNM:i:1\tXS:A:+\n\
        r2\t4\t*\t0\t0\t*\t*\t0\t0\t*\t*\n";

    // SAM in
    let mut reader = Reader::from_slice(text)?;
    assert_eq!(reader.file_type(), FileType::Sam);
    let refs = reader.references().to_vec();
    assert_eq!(refs.len(), 2);

    // BAM out
    let mut writer = Writer::bam(Vec::new(), reader.header_text(), &refs)?;
    let mut count = 0;
    while let Some(record) = reader.next_record()? {
        writer.write_record(&record)?;
        count += 1;
    }
    assert_eq!(count, 2);
    let wire = match writer {
        Writer::Bam(inner) => inner.into_inner(),
        _ => unreachable!(),
    };

    // BAM back in, SAM back out
    let mut reader = Reader::from_slice(&wire)?;
    assert_eq!(reader.file_type(), FileType::Bam);
    assert_eq!(reader.references(), &refs[..]);
    let mut writer = Writer::sam(Vec::new(), b"@HD\tVN:1.6\n", &refs)?;
    while let Some(record) = reader.next_record()? {
        writer.write_record(&record)?;
    }
    let out = match writer {
        Writer::Sam(inner) => inner.into_inner(),
        _ => unreachable!(),
    };
    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("r1\t99\tchr1\t101\t60\t4M\tchr2\t41\t0\tACGT\t????\tNM:i:1\tXS:A:+\n"));
    assert!(out.contains("r2\t4\t*\t0\t0\t*\t*\t0\t0\t*\t*\n"));
    Ok(())
}

#[test]
fn bgzf_payload_round_trip_preserves_bytes() -> Result<(), SbError> {
    // re-encoding a container preserves the inflated payload even though the
    // compressed bytes may differ by level
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let mut writer = bgzf::Writer::with_level(Vec::new(), flate2::Compression::best());
    writer.write(&payload)?;
    let wire = writer.into_inner()?;

    let mut reader = bgzf::Reader::new(&wire[..]);
    let mut inflated = Vec::new();
    while let Some(chunk) = reader.next_chunk()? {
        let amt = chunk.len();
        inflated.extend_from_slice(chunk);
        let _ = reader.consume(amt);
    }
    assert_eq!(inflated, payload);

    let mut rewriter = bgzf::Writer::with_level(Vec::new(), flate2::Compression::fast());
    rewriter.write(&inflated)?;
    let rewire = rewriter.into_inner()?;

    let mut reader = bgzf::Reader::new(&rewire[..]);
    let mut reinflated = Vec::new();
    while let Some(chunk) = reader.next_chunk()? {
        let amt = chunk.len();
        reinflated.extend_from_slice(chunk);
        let _ = reader.consume(amt);
    }
    assert_eq!(reinflated, payload);
    Ok(())
}

#[test]
fn empty_bgzf_input_yields_no_records() -> Result<(), SbError> {
    let mut reader = Reader::from_slice(&bgzf::EMPTY_BLOCK)?;
    assert!(reader.references().is_empty());
    assert!(reader.next_record()?.is_none());
    Ok(())
}

#[test]
fn stream_and_slice_modes_agree() -> Result<(), SbError> {
    let refs = references();
    let mut writer = Writer::bgzf(Vec::new(), b"@HD\tVN:1.6\n", &refs, None)?;
    for i in 0..100 {
        writer.write_record(&mapped(b"r", i))?;
    }
    writer.finalize()?;
    let wire = match writer {
        Writer::Bgzf(inner) => inner.into_inner()?,
        _ => unreachable!(),
    };

    let mut stream_reader = Reader::new(Box::new(&wire[..]))?;
    let mut slice_reader = Reader::from_slice(&wire)?;
    for i in 0..100 {
        let a = stream_reader
            .next_record()?
            .expect("stream record")
            .into_owned();
        let b = slice_reader
            .next_record()?
            .expect("slice record")
            .into_owned();
        assert_eq!(a.position, i);
        assert_eq!(b.position, i);
        assert_eq!(a.name, b.name);
    }
    assert!(stream_reader.next_record()?.is_none());
    assert!(slice_reader.next_record()?.is_none());
    Ok(())
}
