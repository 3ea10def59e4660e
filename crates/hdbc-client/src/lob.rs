//! Piecewise LOB transfer loops.
//!
//! Downloads pull chunks by locator id until the server flags the last
//! data; for character LOBs the request offset advances in the server's
//! character convention (a surrogate pair counts twice), which the CESU-8
//! module computes from the received bytes. Uploads push the remaining
//! chunks of every LOB parameter after the execute reply handed out the
//! locator ids; descriptors leave the loop as their last chunk is
//! acknowledged.

use hdbc_proto::{
    cesu8,
    fields::ParameterField,
    lob::{LobInDescr, LobOutDescr, LocatorId, ReadLobReply, ReadLobRequest, WriteLobChunk},
    parts::Part,
    value::HdbValue,
    MessageType, PartKind, ProtocolError,
};

use crate::{
    error::Result,
    rows::CallResultData,
    session::SessionInner,
};

/// Download a LOB into `out`, starting from the descriptor's inline bytes.
pub(crate) async fn read_lob_into(
    session: &mut SessionInner,
    descr: &LobOutDescr,
    out: &mut Vec<u8>,
) -> Result<()> {
    out.extend_from_slice(&descr.b);

    let count = |bytes: &[u8]| -> Result<u64> {
        if descr.is_char_based {
            Ok(cesu8::char_count(bytes)?)
        } else {
            Ok(bytes.len() as u64)
        }
    };

    let chunk_size = session.lob_chunk_size as u64;
    let mut ofs = count(&descr.b)?;
    let mut eof = descr.opt.is_last_data();

    while !eof {
        let request = ReadLobRequest {
            id: descr.id,
            ofs,
            chunk_size: chunk_size.min(descr.num_char.saturating_sub(ofs)) as i32,
        };
        let reply =
            session.channel.exchange(MessageType::ReadLob, false, &[Part::ReadLob(request)]).await?;

        let mut lob_reply = ReadLobReply::default();
        reply.for_each_part(|ph, dec| {
            if ph.part_kind == PartKind::ReadLobReply {
                lob_reply = ReadLobReply::decode(dec);
            }
            Ok(())
        })?;

        if lob_reply.id != descr.id {
            return Err(
                ProtocolError::LocatorMismatch { got: lob_reply.id, expected: descr.id }.into()
            );
        }

        out.extend_from_slice(&lob_reply.b);
        ofs += count(&lob_reply.b)?;
        eof = lob_reply.opt.is_last_data();
    }
    Ok(())
}

/// Upload the remaining chunks of every LOB parameter.
///
/// `cr` is present on the call path: its output parameters arrive only
/// after the last chunk was written, inside a `WriteLobReply` message.
pub(crate) async fn write_lobs(
    session: &mut SessionInner,
    mut cr: Option<&mut CallResultData>,
    mut ids: Vec<LocatorId>,
    in_fields: &[ParameterField],
    args: &mut [HdbValue],
) -> Result<()> {
    let num_fields = in_fields.len();
    if num_fields == 0 {
        return Err(ProtocolError::Other("lob locator ids without lob parameters".into()).into());
    }

    // pair every LOB argument with its locator, in parameter order
    let mut descrs: Vec<(&mut LobInDescr, LocatorId)> = Vec::with_capacity(ids.len());
    {
        let mut id_iter = ids.iter().copied();
        for (i, arg) in args.iter_mut().enumerate() {
            if in_fields[i % num_fields].type_code.is_lob() {
                if let HdbValue::Lob(descr) = arg {
                    let id = id_iter.next().ok_or_else(|| {
                        ProtocolError::Other(format!("invalid number of lob locator ids {}", i))
                    })?;
                    descrs.push((descr, id));
                }
            }
        }
    }

    let chunk_size = session.lob_chunk_size;
    while !descrs.is_empty() {
        if descrs.len() != ids.len() {
            return Err(ProtocolError::Other(format!(
                "invalid number of lob locator ids {} - expected {}",
                ids.len(),
                descrs.len()
            ))
            .into());
        }
        for ((_, descr_id), id) in descrs.iter().zip(&ids) {
            if descr_id != id {
                return Err(
                    ProtocolError::LocatorMismatch { got: *id, expected: *descr_id }.into()
                );
            }
        }

        for (descr, _) in &mut descrs {
            descr.fetch_next(chunk_size)?;
        }

        let chunks: Vec<WriteLobChunk<'_>> = descrs
            .iter()
            .map(|(descr, id)| WriteLobChunk { id: *id, opt: descr.options(), b: descr.chunk() })
            .collect();
        let reply =
            session.channel.exchange(MessageType::WriteLob, false, &[Part::WriteLob(&chunks)]).await?;
        drop(chunks);

        let mut new_ids: Option<Vec<LocatorId>> = None;
        reply.for_each_part(|ph, dec| {
            match ph.part_kind {
                PartKind::WriteLobReply => {
                    new_ids =
                        Some(hdbc_proto::lob::WriteLobReply::decode(dec, ph.num_arg()).ids);
                },
                PartKind::OutputParameters => {
                    if let Some(cr) = cr.as_deref_mut() {
                        cr.output_values = hdbc_proto::resultset::decode_output_parameters(
                            dec,
                            &cr.output_fields,
                            ph.num_arg(),
                            &mut cr.decode_errors,
                        );
                    }
                },
                _ => {},
            }
            Ok(())
        })?;
        descrs.retain(|(descr, _)| !descr.is_last());
        // servers rarely reassign locators; otherwise keep the pairing
        ids = match new_ids {
            Some(new_ids) if !new_ids.is_empty() => new_ids,
            _ => descrs.iter().map(|(_, id)| *id).collect(),
        };
    }
    Ok(())
}
