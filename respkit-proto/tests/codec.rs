use bytes::Bytes;
use respkit_proto::{decode, encode_command, encode_reply, DecodeLimits, Reply};

fn decode_all(input: &[u8]) -> anyhow::Result<Vec<Reply>> {
    let limits = DecodeLimits::default();
    let mut replies = Vec::new();
    let mut offset = 0;
    while offset < input.len() {
        let (reply, consumed) =
            decode(&input[offset..], &limits)?.ok_or_else(|| anyhow::anyhow!("truncated input"))?;
        replies.push(reply);
        offset += consumed;
    }
    Ok(replies)
}

#[test]
fn request_frame_decodes_back_to_its_arguments() -> anyhow::Result<()> {
    let args: Vec<Vec<u8>> = vec![
        b"HSET".to_vec(),
        b"user:1".to_vec(),
        Vec::new(),
        vec![0xff, 0x00, b'\r', b'\n', b'$'],
        "名前".as_bytes().to_vec(),
    ];
    let mut frame = Vec::new();
    encode_command(&args, &mut frame);

    let replies = decode_all(&frame)?;
    assert_eq!(replies.len(), 1);
    let expected = Reply::array(args.iter().map(|a| Reply::bulk(Bytes::from(a.clone()))).collect());
    assert_eq!(replies[0], expected);
    Ok(())
}

#[test]
fn decoding_same_bytes_twice_is_structurally_equal() -> anyhow::Result<()> {
    let wire = b"*3\r\n%1\r\n+k\r\n$-1\r\n*-1\r\n*0\r\n".to_vec();
    let copy = wire.clone();
    assert_eq!(decode_all(&wire)?, decode_all(&copy)?);
    Ok(())
}

#[test]
fn encoded_replies_decode_to_themselves() -> anyhow::Result<()> {
    let reply = Reply::array(vec![
        Reply::Status("OK".into()),
        Reply::error_from_text("WRONGTYPE bad type"),
        Reply::Integer(-7),
        Reply::Bulk(None),
        Reply::bulk(Bytes::new()),
        Reply::Array(None),
        Reply::Map(vec![(Reply::bulk(&b"f"[..]), Reply::Double(1.5))]),
        Reply::Set(vec![Reply::Boolean(false)]),
        Reply::Verbatim {
            format: *b"txt",
            data: Bytes::from_static(b"hello"),
        },
        Reply::BigNumber("-12345678901234567890".into()),
        Reply::Null,
    ]);
    let mut frame = Vec::new();
    encode_reply(&reply, &mut frame);
    assert_eq!(decode_all(&frame)?, vec![reply]);
    Ok(())
}

#[test]
fn pipelined_replies_split_at_frame_boundaries() -> anyhow::Result<()> {
    let replies = decode_all(b"+OK\r\n:1\r\n$3\r\nabc\r\n")?;
    assert_eq!(
        replies,
        vec![
            Reply::Status("OK".into()),
            Reply::Integer(1),
            Reply::bulk(&b"abc"[..]),
        ]
    );
    Ok(())
}
