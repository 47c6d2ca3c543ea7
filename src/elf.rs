//! ELF64 image builder (spec.md §4.9)
//!
//! Takes the merged `ObjectImage` produced by assembling the compiled
//! program together with the bundled runtime (`runtime::runtime_lines`),
//! assigns virtual addresses to each section, resolves every relocation
//! against those addresses, and serializes the final executable bytes.
//!
//! Layout: ELF header, two program headers, `.text` (page-aligned),
//! `.rodata` (16-byte-aligned, contiguous with `.text`), `.data`
//! (page-aligned), `.bss` (no file bytes), then `.shstrtab`/`.strtab`/
//! `.symtab` and the section header table — 8 sections total, matching
//! spec.md's enumeration.

use crate::assembler::{ObjectImage, RelocKind, Section, Symbol};

const PAGE_SIZE: u64 = 0x1000;
const BASE_ADDR: u64 = 0x400000;
const EHDR_SIZE: u64 = 64;
const PHDR_SIZE: u64 = 56;
const SHDR_SIZE: u64 = 64;
const SYM_SIZE: u64 = 24;

fn align_up(v: u64, align: u64) -> u64 {
    (v + align - 1) / align * align
}

/// Concatenates two object images section-by-section, shifting `b`'s
/// symbol offsets and relocation sites by however much of `a` now
/// precedes them in the merged section.
pub fn merge(mut a: ObjectImage, b: ObjectImage) -> ObjectImage {
    let text_base = a.text.len() as u32;
    let rodata_base = a.rodata.len() as u32;
    let data_base = a.data.len() as u32;
    let bss_base = a.bss_len;

    let shift = |section: Section| -> u32 {
        match section {
            Section::Text => text_base,
            Section::Rodata => rodata_base,
            Section::Data => data_base,
            Section::Bss => bss_base,
        }
    };

    a.text.extend(b.text);
    a.rodata.extend(b.rodata);
    a.data.extend(b.data);
    a.bss_len += b.bss_len;

    for sym in b.symbols {
        let offset = sym.offset + shift(sym.section);
        a.symbols.push(Symbol { name: sym.name, section: sym.section, offset });
    }
    for reloc in b.relocations {
        let mut reloc = reloc;
        reloc.offset += shift(reloc.section);
        a.relocations.push(reloc);
    }
    a
}

struct Layout {
    text_vaddr: u64,
    text_offset: u64,
    rodata_vaddr: u64,
    data_vaddr: u64,
    data_offset: u64,
    bss_vaddr: u64,
    load1_end: u64, // file offset == memory extent of the R|X segment
}

fn compute_layout(image: &ObjectImage) -> Layout {
    let text_offset = PAGE_SIZE;
    let text_vaddr = BASE_ADDR + text_offset;
    let rodata_offset = text_offset + align_up(image.text.len() as u64, 16);
    let rodata_vaddr = BASE_ADDR + rodata_offset;
    let load1_end = rodata_offset + image.rodata.len() as u64;
    let data_offset = align_up(load1_end, PAGE_SIZE);
    let data_vaddr = BASE_ADDR + data_offset;
    let bss_vaddr = data_vaddr + image.data.len() as u64;
    Layout {
        text_vaddr,
        text_offset,
        rodata_vaddr,
        data_vaddr,
        data_offset,
        bss_vaddr,
        load1_end,
    }
}

fn section_vaddr(layout: &Layout, section: Section) -> u64 {
    match section {
        Section::Text => layout.text_vaddr,
        Section::Rodata => layout.rodata_vaddr,
        Section::Data => layout.data_vaddr,
        Section::Bss => layout.bss_vaddr,
    }
}

fn section_bytes_mut<'a>(image: &'a mut ObjectImage, section: Section) -> &'a mut Vec<u8> {
    match section {
        Section::Text => &mut image.text,
        Section::Rodata => &mut image.rodata,
        Section::Data => &mut image.data,
        Section::Bss => unreachable!(".bss relocations are not supported (no file bytes to patch)"),
    }
}

/// Resolves every relocation in place against the final layout; returns
/// the list of symbols that had no definition anywhere in `image`
/// (left as zero at their fixup sites — a link error spec.md's scope
/// does not otherwise name, so this just reports it to the caller).
fn apply_relocations(image: &mut ObjectImage, layout: &Layout) -> Vec<String> {
    let mut vaddrs = std::collections::HashMap::new();
    for sym in &image.symbols {
        vaddrs.insert(sym.name.clone(), section_vaddr(layout, sym.section) + sym.offset as u64);
    }
    let mut undefined = Vec::new();
    let relocations = std::mem::take(&mut image.relocations);
    for reloc in relocations {
        let Some(&target_vaddr) = vaddrs.get(&reloc.symbol) else {
            undefined.push(reloc.symbol.clone());
            continue;
        };
        let site_vaddr = section_vaddr(layout, reloc.section) + reloc.offset as u64;
        let value: i64 = match reloc.kind {
            RelocKind::Pc32 => target_vaddr as i64 + reloc.addend - (site_vaddr as i64 + 4),
            RelocKind::Abs64 | RelocKind::Abs32 | RelocKind::Abs32Signed => target_vaddr as i64 + reloc.addend,
        };
        let bytes = section_bytes_mut(image, reloc.section);
        let at = reloc.offset as usize;
        match reloc.kind {
            RelocKind::Abs64 => bytes[at..at + 8].copy_from_slice(&value.to_le_bytes()),
            _ => bytes[at..at + 4].copy_from_slice(&(value as i32).to_le_bytes()),
        }
    }
    undefined
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Builds the final bytes. `object_only` produces an unlinked `ET_REL`
/// image (no program headers, no relocation resolution) rather than a
/// statically linked `ET_EXEC`.
pub fn build_image(mut image: ObjectImage, object_only: bool) -> Vec<u8> {
    if object_only {
        return build_object(&image);
    }

    let layout = compute_layout(&image);
    let undefined = apply_relocations(&mut image, &layout);
    debug_assert!(undefined.is_empty(), "unresolved runtime symbols: {undefined:?}");

    let entry = image
        .symbols
        .iter()
        .find(|s| s.name == "_start")
        .map(|s| section_vaddr(&layout, s.section) + s.offset as u64)
        .unwrap_or(layout.text_vaddr);

    let data_end_offset = layout.data_offset + image.data.len() as u64;

    let (shstrtab, name_offsets) = build_strtab(&[".text", ".rodata", ".data", ".bss", ".shstrtab", ".strtab", ".symtab"]);
    let (strtab, sym_name_offsets) = build_strtab(&image.symbols.iter().map(|s| s.name.as_str()).collect::<Vec<_>>());

    let mut symtab = Vec::new();
    // null symbol (index 0)
    symtab.extend(std::iter::repeat(0u8).take(SYM_SIZE as usize));
    for (sym, name_off) in image.symbols.iter().zip(&sym_name_offsets) {
        push_u32(&mut symtab, *name_off);
        symtab.push((1 << 4) | 2); // st_info: bind=GLOBAL(1), type=FUNC(2)
        symtab.push(0); // st_other
        push_u16(&mut symtab, shndx_for(sym.section));
        push_u64(&mut symtab, section_vaddr(&layout, sym.section) + sym.offset as u64);
        push_u64(&mut symtab, 0); // st_size unknown
    }

    let shstrtab_off = data_end_offset;
    let strtab_off = shstrtab_off + shstrtab.len() as u64;
    let symtab_off = strtab_off + strtab.len() as u64;
    let shoff = align_up(symtab_off + symtab.len() as u64, 8);

    let mut out = Vec::new();
    write_ehdr(&mut out, 2 /* ET_EXEC */, entry, EHDR_SIZE, shoff, 2);

    // PT_LOAD 1: R|X covering .text + .rodata
    push_phdr(&mut out, 1, 5, 0, BASE_ADDR, layout.load1_end, layout.load1_end, PAGE_SIZE);
    // PT_LOAD 2: R|W covering .data + .bss
    push_phdr(
        &mut out,
        1,
        6,
        layout.data_offset,
        layout.data_vaddr,
        image.data.len() as u64,
        image.data.len() as u64 + image.bss_len as u64,
        PAGE_SIZE,
    );

    out.resize(layout.text_offset as usize, 0);
    out.extend(&image.text);
    out.resize(layout.rodata_vaddr as usize - BASE_ADDR as usize, 0);
    out.extend(&image.rodata);
    out.resize(layout.data_offset as usize, 0);
    out.extend(&image.data);
    out.extend(&shstrtab);
    out.extend(&strtab);
    out.extend(&symtab);
    out.resize(shoff as usize, 0);

    push_shdr(&mut out, 0, 0, 0, 0, 0, 0, 0, 0, 0); // null section
    push_shdr(&mut out, name_offsets[0], 1, 0x6, layout.text_vaddr, layout.text_offset, image.text.len() as u64, 0, 0, 1); // .text SHT_PROGBITS|ALLOC+EXEC
    push_shdr(&mut out, name_offsets[1], 1, 0x2, layout.rodata_vaddr, layout.rodata_vaddr - BASE_ADDR, image.rodata.len() as u64, 0, 0, 16); // .rodata
    push_shdr(&mut out, name_offsets[2], 1, 0x3, layout.data_vaddr, layout.data_offset, image.data.len() as u64, 0, 0, 8); // .data
    push_shdr(&mut out, name_offsets[3], 8, 0x3, layout.bss_vaddr, layout.data_offset + image.data.len() as u64, image.bss_len as u64, 0, 0, 8); // .bss SHT_NOBITS
    push_shdr(&mut out, name_offsets[4], 3, 0, 0, shstrtab_off, shstrtab.len() as u64, 0, 0, 1); // .shstrtab
    push_shdr(&mut out, name_offsets[5], 3, 0, 0, strtab_off, strtab.len() as u64, 0, 0, 1); // .strtab
    push_shdr(&mut out, name_offsets[6], 2, 0, 0, symtab_off, symtab.len() as u64, 6, 0, 8); // .symtab, link=strtab idx

    out
}

/// Minimal `ET_REL` object: the same four data sections and symbol table,
/// no program headers, entry point 0, relocation sites left unpatched.
fn build_object(image: &ObjectImage) -> Vec<u8> {
    let (shstrtab, name_offsets) = build_strtab(&[".text", ".rodata", ".data", ".bss", ".shstrtab", ".strtab", ".symtab"]);
    let (strtab, sym_name_offsets) = build_strtab(&image.symbols.iter().map(|s| s.name.as_str()).collect::<Vec<_>>());

    let mut symtab = Vec::new();
    symtab.extend(std::iter::repeat(0u8).take(SYM_SIZE as usize));
    for (sym, name_off) in image.symbols.iter().zip(&sym_name_offsets) {
        push_u32(&mut symtab, *name_off);
        symtab.push((1 << 4) | 2);
        symtab.push(0);
        push_u16(&mut symtab, shndx_for(sym.section));
        push_u64(&mut symtab, sym.offset as u64);
        push_u64(&mut symtab, 0);
    }

    let text_off = EHDR_SIZE;
    let rodata_off = text_off + image.text.len() as u64;
    let data_off = rodata_off + image.rodata.len() as u64;
    let shstrtab_off = data_off + image.data.len() as u64;
    let strtab_off = shstrtab_off + shstrtab.len() as u64;
    let symtab_off = strtab_off + strtab.len() as u64;
    let shoff = symtab_off + symtab.len() as u64;

    let mut out = Vec::new();
    write_ehdr(&mut out, 1 /* ET_REL */, 0, EHDR_SIZE, shoff, 0);
    out.extend(&image.text);
    out.extend(&image.rodata);
    out.extend(&image.data);
    out.extend(&shstrtab);
    out.extend(&strtab);
    out.extend(&symtab);

    push_shdr(&mut out, 0, 0, 0, 0, 0, 0, 0, 0, 0);
    push_shdr(&mut out, name_offsets[0], 1, 0x6, 0, text_off, image.text.len() as u64, 0, 0, 1);
    push_shdr(&mut out, name_offsets[1], 1, 0x2, 0, rodata_off, image.rodata.len() as u64, 0, 0, 16);
    push_shdr(&mut out, name_offsets[2], 1, 0x3, 0, data_off, image.data.len() as u64, 0, 0, 8);
    push_shdr(&mut out, name_offsets[3], 8, 0x3, 0, data_off + image.data.len() as u64, image.bss_len as u64, 0, 0, 8);
    push_shdr(&mut out, name_offsets[4], 3, 0, 0, shstrtab_off, shstrtab.len() as u64, 0, 0, 1);
    push_shdr(&mut out, name_offsets[5], 3, 0, 0, strtab_off, strtab.len() as u64, 0, 0, 1);
    push_shdr(&mut out, name_offsets[6], 2, 0, 0, symtab_off, symtab.len() as u64, 6, 0, 8);

    out
}

fn shndx_for(section: Section) -> u16 {
    match section {
        Section::Text => 1,
        Section::Rodata => 2,
        Section::Data => 3,
        Section::Bss => 4,
    }
}

/// Builds a string table (leading NUL, then each name NUL-terminated)
/// and returns the byte offset of each input name within it.
fn build_strtab(names: &[&str]) -> (Vec<u8>, Vec<u32>) {
    let mut table = vec![0u8];
    let mut offsets = Vec::with_capacity(names.len());
    for name in names {
        offsets.push(table.len() as u32);
        table.extend(name.as_bytes());
        table.push(0);
    }
    (table, offsets)
}

fn write_ehdr(out: &mut Vec<u8>, e_type: u16, entry: u64, phoff: u64, shoff: u64, phnum: u16) {
    out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 2, 1, 1, 0]);
    out.extend_from_slice(&[0u8; 8]); // padding
    push_u16(out, e_type);
    push_u16(out, 0x3E); // EM_X86_64
    push_u32(out, 1); // e_version
    push_u64(out, entry);
    push_u64(out, if phnum == 0 { 0 } else { phoff });
    push_u64(out, shoff);
    push_u32(out, 0); // e_flags
    push_u16(out, EHDR_SIZE as u16);
    push_u16(out, PHDR_SIZE as u16);
    push_u16(out, phnum);
    push_u16(out, SHDR_SIZE as u16);
    push_u16(out, 8); // e_shnum
    push_u16(out, 5); // e_shstrndx
}

#[allow(clippy::too_many_arguments)]
fn push_phdr(out: &mut Vec<u8>, p_type: u32, p_flags: u32, offset: u64, vaddr: u64, filesz: u64, memsz: u64, align: u64) {
    push_u32(out, p_type);
    push_u32(out, p_flags);
    push_u64(out, offset);
    push_u64(out, vaddr);
    push_u64(out, vaddr); // p_paddr, unused
    push_u64(out, filesz);
    push_u64(out, memsz);
    push_u64(out, align);
}

#[allow(clippy::too_many_arguments)]
fn push_shdr(out: &mut Vec<u8>, name: u32, sh_type: u32, flags: u64, addr: u64, offset: u64, size: u64, link: u32, info: u32, align: u64) {
    push_u32(out, name);
    push_u32(out, sh_type);
    push_u64(out, flags);
    push_u64(out, addr);
    push_u64(out, offset);
    push_u64(out, size);
    push_u32(out, link);
    push_u32(out, info);
    push_u64(out, align);
    push_u64(out, 0); // sh_entsize, unused for these section kinds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{Relocation, Symbol};

    fn minimal_image() -> ObjectImage {
        let mut image = ObjectImage::default();
        image.text = vec![0xB8, 0x00, 0x00, 0x00, 0x00, 0xC3]; // mov $0, %eax; ret (placeholder bytes)
        image.symbols.push(Symbol { name: "_start".to_string(), section: Section::Text, offset: 0 });
        image
    }

    #[test]
    fn begins_with_elf_magic() {
        let bytes = build_image(minimal_image(), false);
        assert_eq!(&bytes[0..4], &[0x7F, b'E', b'L', b'F']);
    }

    #[test]
    fn entry_point_resolves_to_start_symbol() {
        let bytes = build_image(minimal_image(), false);
        let entry = u64::from_le_bytes(bytes[24..32].try_into().unwrap());
        assert_eq!(entry, BASE_ADDR + PAGE_SIZE);
    }

    #[test]
    fn pc32_relocation_is_patched_against_final_vaddr() {
        let mut image = minimal_image();
        image.text.extend_from_slice(&[0xE8, 0, 0, 0, 0]); // call rel32 placeholder
        image.relocations.push(Relocation {
            section: Section::Text,
            offset: 6,
            symbol: "_start".to_string(),
            kind: RelocKind::Pc32,
            addend: 0,
        });
        let bytes = build_image(image, false);
        let text_vaddr = BASE_ADDR + PAGE_SIZE;
        let site_vaddr = text_vaddr + 6;
        let expected = (text_vaddr as i64) - (site_vaddr as i64 + 4);
        let patched = i32::from_le_bytes(bytes[(PAGE_SIZE as usize + 6)..(PAGE_SIZE as usize + 10)].try_into().unwrap());
        assert_eq!(patched as i64, expected);
    }

    #[test]
    fn object_only_produces_et_rel_with_zero_entry() {
        let bytes = build_image(minimal_image(), true);
        let e_type = u16::from_le_bytes(bytes[16..18].try_into().unwrap());
        assert_eq!(e_type, 1); // ET_REL
        let entry = u64::from_le_bytes(bytes[24..32].try_into().unwrap());
        assert_eq!(entry, 0);
    }
}
