//! Linked lists and hash maps

use super::{expect, free_owned, ints_of, new_strings, static_strings, string_pairs, strings_of};
use crate::descriptor::{ArgInfo, CallableInfo, ListKind, TypeDescriptor};
use crate::error::{CallError, RegistryError};
use crate::heap::{Block, NativeRepr};
use crate::invoke::{native, Frame};
use crate::registry::Library;
use crate::transfer::TransferMode;

const LIST_RETURN: [&str; 3] = ["0", "1", "2"];
const LIST_INOUT: [&str; 4] = ["-2", "-1", "0", "1"];
const MAP_RETURN: [(&str, &str); 4] = [("-1", "1"), ("0", "0"), ("1", "-1"), ("2", "-2")];
const MAP_INOUT: [(&str, &str); 3] = [("-1", "1"), ("0", "0"), ("1", "1")];

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn pairs(values: &[(&str, &str)]) -> Vec<(String, String)> {
    values
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// List with the given elements, allocated per `mode`
fn build_list(frame: &mut Frame<'_>, kind: ListKind, values: &[&str], key: &str, mode: TransferMode) -> NativeRepr {
    match mode {
        TransferMode::None => {
            let items = static_strings(frame, values);
            frame.constant(key, Block::List { kind, items })
        }
        TransferMode::Container => {
            let items = static_strings(frame, values);
            frame.alloc(Block::List { kind, items })
        }
        TransferMode::Full => {
            let items = new_strings(frame, values);
            frame.alloc(Block::List { kind, items })
        }
    }
}

fn build_map(frame: &mut Frame<'_>, values: &[(&str, &str)], key: &str, mode: TransferMode) -> NativeRepr {
    let entries: Vec<(NativeRepr, NativeRepr)> = values
        .iter()
        .map(|(k, v)| match mode {
            TransferMode::Full => (frame.new_utf8(k), frame.new_utf8(v)),
            _ => (frame.constant_utf8(k), frame.constant_utf8(v)),
        })
        .collect();
    match mode {
        TransferMode::None => frame.constant(key, Block::Map(entries)),
        _ => frame.alloc(Block::Map(entries)),
    }
}

/// Release an inout input according to its transfer
fn release_input(frame: &mut Frame<'_>, mode: TransferMode) -> Result<(), CallError> {
    let given = frame.arg(0).clone();
    match mode {
        TransferMode::None => Ok(()),
        TransferMode::Container => frame.free(&given).map(|_| ()),
        TransferMode::Full => free_owned(frame, &given),
    }
}

fn mode_name(mode: TransferMode) -> &'static str {
    match mode {
        TransferMode::None => "none",
        TransferMode::Container => "container",
        TransferMode::Full => "full",
    }
}

pub(super) fn register(library: &mut Library) -> Result<(), RegistryError> {
    for (prefix, kind) in [("list", ListKind::Doubly), ("slist", ListKind::Singly)] {
        register_lists(library, prefix, kind)?;
    }
    register_maps(library)
}

fn register_lists(library: &mut Library, prefix: &str, kind: ListKind) -> Result<(), RegistryError> {
    let list = move |element: TypeDescriptor| TypeDescriptor::List {
        element: Box::new(element),
        kind,
    };

    for mode in [TransferMode::None, TransferMode::Container, TransferMode::Full] {
        let key = format!("{}:return", prefix);
        library.register_function(
            CallableInfo::new(&format!("{}_utf8_{}_return", prefix, mode_name(mode)))
                .returns(list(TypeDescriptor::Utf8), mode),
            native(move |frame| {
                let list = build_list(frame, kind, &LIST_RETURN, &key, mode);
                frame.set_return(list);
                Ok(())
            }),
        )?;

        let key = format!("{}:inout", prefix);
        library.register_function(
            CallableInfo::new(&format!("{}_utf8_{}_inout", prefix, mode_name(mode)))
                .arg(ArgInfo::new("list", list(TypeDescriptor::Utf8)).inout().transfer(mode)),
            native(move |frame| {
                let block = frame.block(0)?;
                expect("list", &strings_of(frame, &block)?, &strings(&LIST_RETURN))?;
                release_input(frame, mode)?;
                let list = build_list(frame, kind, &LIST_INOUT, &key, mode);
                frame.set_arg(0, list);
                Ok(())
            }),
        )?;
    }

    library.register_function(
        CallableInfo::new(&format!("{}_int_none_in", prefix))
            .arg(ArgInfo::new("list", list(TypeDescriptor::int32()))),
        native(|frame| {
            let block = frame.block(0)?;
            expect("list", ints_of(&block)?.as_slice(), &[-1, 0, 1, 2][..])
        }),
    )?;

    library.register_function(
        CallableInfo::new(&format!("{}_utf8_none_in", prefix))
            .arg(ArgInfo::new("list", list(TypeDescriptor::Utf8))),
        native(|frame| {
            let block = frame.block(0)?;
            expect("list", &strings_of(frame, &block)?, &strings(&LIST_RETURN))
        }),
    )?;

    Ok(())
}

fn register_maps(library: &mut Library) -> Result<(), RegistryError> {
    let utf8_map = || TypeDescriptor::map(TypeDescriptor::Utf8, TypeDescriptor::Utf8);

    library.register_function(
        CallableInfo::new("map_int_none_return").returns(
            TypeDescriptor::map(TypeDescriptor::int32(), TypeDescriptor::int32()),
            TransferMode::None,
        ),
        native(|frame| {
            let entries = [(-1, 1), (0, 0), (1, -1), (2, -2)]
                .iter()
                .map(|(k, v)| (NativeRepr::I32(*k), NativeRepr::I32(*v)))
                .collect();
            let map = frame.constant("map:int", Block::Map(entries));
            frame.set_return(map);
            Ok(())
        }),
    )?;

    for mode in [TransferMode::None, TransferMode::Container, TransferMode::Full] {
        library.register_function(
            CallableInfo::new(&format!("map_utf8_{}_return", mode_name(mode))).returns(utf8_map(), mode),
            native(move |frame| {
                let map = build_map(frame, &MAP_RETURN, "map:return", mode);
                frame.set_return(map);
                Ok(())
            }),
        )?;

        library.register_function(
            CallableInfo::new(&format!("map_utf8_{}_inout", mode_name(mode)))
                .arg(ArgInfo::new("map", utf8_map()).inout().transfer(mode)),
            native(move |frame| {
                let block = frame.block(0)?;
                expect("map", &string_pairs(frame, &block)?, &pairs(&MAP_RETURN))?;
                release_input(frame, mode)?;
                let map = build_map(frame, &MAP_INOUT, "map:inout", mode);
                frame.set_arg(0, map);
                Ok(())
            }),
        )?;
    }

    library.register_function(
        CallableInfo::new("map_utf8_none_in").arg(ArgInfo::new("map", utf8_map())),
        native(|frame| {
            let block = frame.block(0)?;
            expect("map", &string_pairs(frame, &block)?, &pairs(&MAP_RETURN))
        }),
    )?;

    // hands back whatever it was given: null stays null, empty stays empty
    library.register_function(
        CallableInfo::new("map_echo")
            .arg(ArgInfo::new("map", utf8_map()).nullable())
            .returns_nullable(utf8_map(), TransferMode::None),
        native(|frame| {
            let given = frame.arg(0).clone();
            frame.set_return(given);
            Ok(())
        }),
    )?;

    Ok(())
}
