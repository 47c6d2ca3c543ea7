//! Hand-written runtime support, bundled into the compiler's own output
//! (spec.md §5 concurrency/resource model, §6 Runtime ABI table)
//!
//! spec.md lists `runtime_alloc`, `queue_enqueue`, `builtin_print`, etc. as
//! symbols "provided by the linked runtime object" — but this compiler has
//! no separate linker stage, and its own overview describes the output as
//! a single statically linked executable that embeds the scheduler and all
//! handler code as native machine code. So these symbols are assembled
//! here, in the same AT&T text `assembler::assemble` already consumes for
//! compiled program code, and the two listings are concatenated before
//! assembly (see `lib.rs`) so every call site resolves without an external
//! relocation left over.
//!
//! Layout conventions assumed throughout:
//! - A string value is a single register: a pointer to a NUL-terminated
//!   byte sequence. Every string-typed local, state field, and signal
//!   field therefore occupies one 8-byte slot at the register/LIR level;
//!   the compiled program never threads a separate length register
//!   alongside it. `builtin_strlen` recovers the length on demand.
//! - A vec/map value is passed as two consecutive integer registers: data
//!   pointer, then a packed `(cap << 32) | len` word — the natural System V
//!   classification of a 16-byte struct of two eightbytes.
//! - Vec elements and map keys/values are always 8-byte words, matching the
//!   "every state field is 8 bytes" convention the rest of the pipeline
//!   already relies on. Map entries are 16-byte `(key, value)` pairs,
//!   scanned linearly; there is no hashing.
//! - `runtime_alloc` never frees and never grows a buffer in place: vecs
//!   and maps are expected to be allocated with enough capacity up front.
//!   `runtime_free` is a no-op. This matches the bump-allocator simplicity
//!   spec.md's resource policy explicitly allows ("does not prescribe the
//!   allocator's strategy beyond 8-byte alignment").
//! - Each per-instance, per-frequency queue (`signal_queue_<I>_<F>`,
//!   declared by `dispatch.rs`) is a fixed 256-slot ring: 8-byte head index,
//!   8-byte tail index, then 256 8-byte payload-pointer slots.

pub const QUEUE_CAPACITY: u32 = 256;
pub const QUEUE_BYTES: u32 = 16 + QUEUE_CAPACITY * 8;
pub const HEAP_BYTES: u32 = 64 * 1024 * 1024;

/// Capacity handed to `builtin_vec_new`/`builtin_map_new` for a source-level
/// `vec_new()`/`map_new()` call, which carries no explicit size. Vecs built
/// from a tuple literal (`lower_tuple`) instead size exactly to the
/// literal's element count; this constant only covers the empty-literal
/// builtin path, consistent with the bump allocator's no-grow, no-free
/// policy described above.
pub const DEFAULT_COLLECTION_CAPACITY: u32 = 64;

/// Returns the full runtime listing as assembly text lines, ready to be
/// appended to the compiled program's own lines before `assembler::assemble`.
pub fn runtime_lines() -> Vec<String> {
    let mut lines: Vec<&str> = Vec::new();
    lines.extend(BSS_DECLS);
    lines.extend(RODATA_DECLS);
    lines.extend(ALLOC_FNS);
    lines.extend(QUEUE_FNS);
    lines.extend(PRINT_FNS);
    lines.extend(STRING_FNS);
    lines.extend(VEC_FNS);
    lines.extend(MAP_FNS);
    lines.into_iter().map(String::from).collect()
}

const BSS_DECLS: &[&str] = &[
    ".bss",
    "heap_ptr:",
    ".zero 8",
    "heap_region:",
    ".zero 67108864",
];

const RODATA_DECLS: &[&str] = &[".rodata", "rt_newline:", ".byte 10", "rt_i64_buf:", ".zero 24"];

const ALLOC_FNS: &[&str] = &[
    ".text",
    "runtime_alloc:",
    "add $7, %rdi",
    "and $-8, %rdi",
    "mov heap_ptr(%rip), %rax",
    "test %rax, %rax",
    "jne .Lalloc_init_done",
    "lea heap_region(%rip), %rax",
    "mov %rax, heap_ptr(%rip)",
    ".Lalloc_init_done:",
    "mov heap_ptr(%rip), %rax",
    "mov %rax, %rcx",
    "add %rdi, %rax",
    "mov %rax, heap_ptr(%rip)",
    "mov %rcx, %rax",
    "ret",
    "runtime_free:",
    "ret",
];

/// `queue_addr` layout: `[head: 8][tail: 8][slot0: 8]...[slot255: 8]`,
/// index masked into the ring with `& (QUEUE_CAPACITY - 1)` so the slot
/// count must stay a power of two.
const QUEUE_FNS: &[&str] = &[
    "queue_enqueue:",
    "mov 8(%rdi), %rax",
    "mov %rax, %rcx",
    "and $255, %rcx",
    "shl $3, %rcx",
    "add %rdi, %rcx",
    "add $16, %rcx",
    "mov %rsi, (%rcx)",
    "add $1, %rax",
    "mov %rax, 8(%rdi)",
    "ret",
    "queue_dequeue:",
    "mov (%rdi), %rax",
    "mov 8(%rdi), %rcx",
    "cmp %rcx, %rax",
    "je .Lqd_empty",
    "mov %rax, %rdx",
    "and $255, %rdx",
    "shl $3, %rdx",
    "add %rdi, %rdx",
    "add $16, %rdx",
    "mov (%rdx), %rsi",
    "add $1, %rax",
    "mov %rax, (%rdi)",
    "mov %rsi, %rax",
    "ret",
    ".Lqd_empty:",
    "mov $0, %rax",
    "ret",
];

const PRINT_FNS: &[&str] = &[
    // rdi = NUL-terminated data ptr
    "builtin_strlen:",
    "mov %rdi, %r10",
    "mov $0, %rax",
    ".Lstrlen_loop:",
    "movzx (%r10), %ecx",
    "cmp $0, %ecx",
    "je .Lstrlen_done",
    "add $1, %r10",
    "add $1, %rax",
    "jmp .Lstrlen_loop",
    ".Lstrlen_done:",
    "ret",
    "builtin_print:",
    "push %rdi",
    "call builtin_strlen",
    "pop %rsi",
    "mov %rax, %rdx",
    "mov $1, %rdi",
    "mov $1, %rax",
    "syscall",
    "ret",
    "builtin_println:",
    "call builtin_print",
    "lea rt_newline(%rip), %rsi",
    "mov $1, %rdx",
    "mov $1, %rdi",
    "mov $1, %rax",
    "syscall",
    "ret",
    // rdi = value
    "builtin_print_i64:",
    "mov %rdi, %rax",
    "lea rt_i64_buf(%rip), %rcx",
    "add $23, %rcx",
    "mov %rcx, %r8",
    "mov $0, %r9",
    "cmp $0, %rax",
    "jge .Lpi_notneg",
    "mov $1, %r9",
    "neg %rax",
    ".Lpi_notneg:",
    "mov $10, %r11",
    ".Lpi_loop:",
    "mov $0, %rdx",
    "div %r11",
    "add $48, %rdx",
    "mov %dl, (%rcx)",
    "sub $1, %rcx",
    "test %rax, %rax",
    "jne .Lpi_loop",
    "cmp $1, %r9",
    "jne .Lpi_nosign",
    "mov $45, %dl",
    "mov %dl, (%rcx)",
    "sub $1, %rcx",
    ".Lpi_nosign:",
    "add $1, %rcx",
    "mov %r8, %rdx",
    "sub %rcx, %rdx",
    "add $1, %rdx",
    "mov %rcx, %rsi",
    "mov $1, %rdi",
    "mov $1, %rax",
    "syscall",
    "ret",
];

/// `builtin_string_eq`: rdi=a_ptr rsi=b_ptr, returns 0/1 in rax.
/// `builtin_string_concat`: rdi=a_ptr rsi=b_ptr, returns a freshly
/// allocated NUL-terminated ptr in rax. `builtin_format`: rdi=fmt_ptr,
/// rsi/rdx/rcx/r8/r9=up to 5 NUL-terminated substitution args, returns
/// a freshly allocated NUL-terminated ptr in rax — each `{}` in the
/// format string is replaced, in order, by the next argument's bytes.
const STRING_FNS: &[&str] = &[
    "builtin_string_eq:",
    "mov $0, %r10",
    ".Lse_loop:",
    "mov %rdi, %r11",
    "add %r10, %r11",
    "movzx (%r11), %eax",
    "mov %rsi, %r11",
    "add %r10, %r11",
    "movzx (%r11), %ecx",
    "cmp %ecx, %eax",
    "jne .Lse_ne",
    "cmp $0, %eax",
    "je .Lse_eq",
    "add $1, %r10",
    "jmp .Lse_loop",
    ".Lse_eq:",
    "mov $1, %rax",
    "ret",
    ".Lse_ne:",
    "mov $0, %rax",
    "ret",
    "builtin_string_concat:",
    "push %rbx",
    "push %r12",
    "push %r13",
    "push %r14",
    "push %r15",
    "mov %rdi, %rbx",
    "mov %rsi, %r12",
    "call builtin_strlen",
    "mov %rax, %r13",
    "mov %r12, %rdi",
    "call builtin_strlen",
    "mov %rax, %r14",
    "mov %r13, %rdi",
    "add %r14, %rdi",
    "add $1, %rdi",
    "call runtime_alloc",
    "mov %rax, %r15",
    "mov $0, %r10",
    ".Lsc_copy_a:",
    "cmp %r13, %r10",
    "je .Lsc_copy_b_init",
    "mov %rbx, %r11",
    "add %r10, %r11",
    "movzx (%r11), %eax",
    "mov %r15, %r11",
    "add %r10, %r11",
    "mov %al, (%r11)",
    "add $1, %r10",
    "jmp .Lsc_copy_a",
    ".Lsc_copy_b_init:",
    "mov $0, %r9",
    ".Lsc_copy_b:",
    "cmp %r14, %r9",
    "jne .Lsc_copy_b_byte",
    "mov %r15, %r11",
    "add %r13, %r11",
    "add %r14, %r11",
    "mov $0, %rax",
    "mov %al, (%r11)",
    "jmp .Lsc_done",
    ".Lsc_copy_b_byte:",
    "mov %r12, %r11",
    "add %r9, %r11",
    "movzx (%r11), %eax",
    "mov %r15, %r11",
    "add %r13, %r11",
    "add %r9, %r11",
    "mov %al, (%r11)",
    "add $1, %r9",
    "jmp .Lsc_copy_b",
    ".Lsc_done:",
    "mov %r15, %rax",
    "pop %r15",
    "pop %r14",
    "pop %r13",
    "pop %r12",
    "pop %rbx",
    "ret",
    // rdi = value, returns NUL-terminated ptr in rax
    "builtin_format_i64:",
    "push %rbx",
    "push %r12",
    "mov %rdi, %rbx",
    "mov $25, %rdi",
    "call runtime_alloc",
    "mov %rax, %r12",
    "mov $0, %rax",
    "mov %al, 24(%r12)",
    "mov %rbx, %rax",
    "lea 23(%r12), %rcx",
    "mov $0, %r9",
    "cmp $0, %rax",
    "jge .Lfi_notneg",
    "mov $1, %r9",
    "neg %rax",
    ".Lfi_notneg:",
    "mov $10, %r11",
    ".Lfi_loop:",
    "mov $0, %rdx",
    "div %r11",
    "add $48, %rdx",
    "mov %dl, (%rcx)",
    "sub $1, %rcx",
    "test %rax, %rax",
    "jne .Lfi_loop",
    "cmp $1, %r9",
    "jne .Lfi_nosign",
    "mov $45, %dl",
    "mov %dl, (%rcx)",
    "sub $1, %rcx",
    ".Lfi_nosign:",
    "add $1, %rcx",
    "mov %rcx, %rax",
    "pop %r12",
    "pop %rbx",
    "ret",
    // rdi = fmt_ptr, rsi/rdx/rcx/r8/r9 = up to 5 substitution args
    "builtin_format:",
    "push %rbx",
    "push %r12",
    "push %r13",
    "push %r14",
    "push %r15",
    "sub $40, %rsp",
    "mov %rsi, 0(%rsp)",
    "mov %rdx, 8(%rsp)",
    "mov %rcx, 16(%rsp)",
    "mov %r8, 24(%rsp)",
    "mov %r9, 32(%rsp)",
    "mov %rdi, %rbx",
    "mov $0, %r12",
    "mov $0, %r13",
    "mov %rbx, %r14",
    ".Lfmt_len_loop:",
    "movzx (%r14), %eax",
    "cmp $0, %eax",
    "je .Lfmt_len_done",
    "cmp $123, %eax",
    "jne .Lfmt_len_lit",
    "movzx 1(%r14), %ecx",
    "cmp $125, %ecx",
    "jne .Lfmt_len_lit",
    "mov %r13, %rax",
    "shl $3, %rax",
    "add %rsp, %rax",
    "mov (%rax), %rdi",
    "call builtin_strlen",
    "add %rax, %r12",
    "add $1, %r13",
    "add $2, %r14",
    "jmp .Lfmt_len_loop",
    ".Lfmt_len_lit:",
    "add $1, %r12",
    "add $1, %r14",
    "jmp .Lfmt_len_loop",
    ".Lfmt_len_done:",
    "mov %r12, %rdi",
    "add $1, %rdi",
    "call runtime_alloc",
    "mov %rax, %r15",
    "mov %r15, %rax",
    "add %r12, %rax",
    "mov $0, %rcx",
    "mov %cl, (%rax)",
    "mov %rbx, %r14",
    "mov %r15, %r9",
    "mov $0, %r13",
    ".Lfmt_write_loop:",
    "movzx (%r14), %eax",
    "cmp $0, %eax",
    "je .Lfmt_write_done",
    "cmp $123, %eax",
    "jne .Lfmt_write_lit",
    "movzx 1(%r14), %ecx",
    "cmp $125, %ecx",
    "jne .Lfmt_write_lit",
    "mov %r13, %r10",
    "shl $3, %r10",
    "add %rsp, %r10",
    "mov (%r10), %rdi",
    ".Lfmt_write_copy:",
    "movzx (%rdi), %eax",
    "cmp $0, %eax",
    "je .Lfmt_write_copy_done",
    "mov %al, (%r9)",
    "add $1, %rdi",
    "add $1, %r9",
    "jmp .Lfmt_write_copy",
    ".Lfmt_write_copy_done:",
    "add $1, %r13",
    "add $2, %r14",
    "jmp .Lfmt_write_loop",
    ".Lfmt_write_lit:",
    "mov %al, (%r9)",
    "add $1, %r9",
    "add $1, %r14",
    "jmp .Lfmt_write_loop",
    ".Lfmt_write_done:",
    "mov %r15, %rax",
    "add $40, %rsp",
    "pop %r15",
    "pop %r14",
    "pop %r13",
    "pop %r12",
    "pop %rbx",
    "ret",
];

/// Vec elements and map entries are plain 8-byte words; `ptr` is the data
/// pointer, `packed` is `(cap<<32)|len` as described at module top.
const VEC_FNS: &[&str] = &[
    // rdi = capacity, returns (ptr in rax, packed in rdx)
    "builtin_vec_new:",
    "push %rbx",
    "mov %rdi, %rbx",
    "mov %rbx, %rdi",
    "shl $3, %rdi",
    "call runtime_alloc",
    "mov %rbx, %r8",
    "shl $32, %r8",
    "mov %r8, %rdx",
    "pop %rbx",
    "ret",
    // rdi=ptr rsi=packed rdx=value -> new packed in rax
    "builtin_vec_push:",
    "mov %esi, %ecx",
    "mov %rcx, %r8",
    "shl $3, %r8",
    "add %rdi, %r8",
    "mov %rdx, (%r8)",
    "mov %rsi, %rax",
    "add $1, %rax",
    "ret",
    // rdi=ptr rsi=packed -> value in rax, new packed in rdx
    "builtin_vec_pop:",
    "mov %esi, %ecx",
    "sub $1, %rcx",
    "mov %rcx, %r8",
    "shl $3, %r8",
    "add %rdi, %r8",
    "mov (%r8), %rax",
    "mov %rsi, %rdx",
    "sub $1, %rdx",
    "ret",
    // rdi=ptr rsi=packed -> len in rax
    "builtin_vec_len:",
    "mov %esi, %eax",
    "ret",
    // rdi=ptr rsi=packed rdx=index -> value in rax
    "builtin_vec_get:",
    "mov %rdx, %rcx",
    "shl $3, %rcx",
    "add %rdi, %rcx",
    "mov (%rcx), %rax",
    "ret",
    // rdi=ptr rsi=packed rdx=index rcx=value
    "builtin_vec_set:",
    "mov %rdx, %r8",
    "shl $3, %r8",
    "add %rdi, %r8",
    "mov %rcx, (%r8)",
    "ret",
];

const MAP_FNS: &[&str] = &[
    // rdi = capacity, returns (ptr in rax, packed in rdx)
    "builtin_map_new:",
    "push %rbx",
    "mov %rdi, %rbx",
    "mov %rbx, %rdi",
    "shl $4, %rdi",
    "call runtime_alloc",
    "mov %rbx, %r8",
    "shl $32, %r8",
    "mov %r8, %rdx",
    "pop %rbx",
    "ret",
    // rdi=ptr rsi=packed rdx=key rcx=value -> new packed in rax
    "builtin_map_set:",
    "push %rbx",
    "push %r12",
    "mov %rdi, %rbx",
    "mov %esi, %r12d",
    "mov $0, %r9",
    ".Lms_scan:",
    "cmp %r12, %r9",
    "je .Lms_append",
    "mov %r9, %r8",
    "shl $4, %r8",
    "add %rbx, %r8",
    "mov (%r8), %r10",
    "cmp %rdx, %r10",
    "je .Lms_found",
    "add $1, %r9",
    "jmp .Lms_scan",
    ".Lms_found:",
    "mov %r9, %r8",
    "shl $4, %r8",
    "add %rbx, %r8",
    "mov %rcx, 8(%r8)",
    "mov %rsi, %rax",
    "pop %r12",
    "pop %rbx",
    "ret",
    ".Lms_append:",
    "mov %r12, %r8",
    "shl $4, %r8",
    "add %rbx, %r8",
    "mov %rdx, (%r8)",
    "mov %rcx, 8(%r8)",
    "mov %rsi, %rax",
    "add $1, %rax",
    "pop %r12",
    "pop %rbx",
    "ret",
    // rdi=ptr rsi=packed rdx=key -> value in rax (0 if missing)
    "builtin_map_get:",
    "mov %esi, %r9d",
    "mov $0, %r10",
    ".Lmg_scan:",
    "cmp %r9, %r10",
    "je .Lmg_missing",
    "mov %r10, %r8",
    "shl $4, %r8",
    "add %rdi, %r8",
    "mov (%r8), %r11",
    "cmp %rdx, %r11",
    "je .Lmg_found",
    "add $1, %r10",
    "jmp .Lmg_scan",
    ".Lmg_found:",
    "mov %r10, %r8",
    "shl $4, %r8",
    "add %rdi, %r8",
    "mov 8(%r8), %rax",
    "ret",
    ".Lmg_missing:",
    "mov $0, %rax",
    "ret",
    // rdi=ptr rsi=packed -> count in rax
    "builtin_map_len:",
    "mov %esi, %eax",
    "ret",
    // rdi=ptr rsi=packed -> (vec ptr in rax, packed in rdx) of keys
    "builtin_map_keys:",
    "push %rbx",
    "push %r12",
    "push %r13",
    "mov %rdi, %rbx",
    "mov %esi, %r12d",
    "mov %r12, %rdi",
    "shl $3, %rdi",
    "call runtime_alloc",
    "mov %rax, %r13",
    "mov $0, %r9",
    ".Lmk_loop:",
    "cmp %r12, %r9",
    "je .Lmk_done",
    "mov %r9, %r8",
    "shl $4, %r8",
    "add %rbx, %r8",
    "mov (%r8), %r10",
    "mov %r9, %r8",
    "shl $3, %r8",
    "add %r13, %r8",
    "mov %r10, (%r8)",
    "add $1, %r9",
    "jmp .Lmk_loop",
    ".Lmk_done:",
    "mov %r12, %rcx",
    "shl $32, %rcx",
    "mov %rcx, %rdx",
    "mov %r13, %rax",
    "pop %r13",
    "pop %r12",
    "pop %rbx",
    "ret",
    // rdi=ptr rsi=packed -> (vec ptr in rax, packed in rdx) of values
    "builtin_map_values:",
    "push %rbx",
    "push %r12",
    "push %r13",
    "mov %rdi, %rbx",
    "mov %esi, %r12d",
    "mov %r12, %rdi",
    "shl $3, %rdi",
    "call runtime_alloc",
    "mov %rax, %r13",
    "mov $0, %r9",
    ".Lmv_loop:",
    "cmp %r12, %r9",
    "je .Lmv_done",
    "mov %r9, %r8",
    "shl $4, %r8",
    "add %rbx, %r8",
    "mov 8(%r8), %r10",
    "mov %r9, %r8",
    "shl $3, %r8",
    "add %r13, %r8",
    "mov %r10, (%r8)",
    "add $1, %r9",
    "jmp .Lmv_loop",
    ".Lmv_done:",
    "mov %r12, %rcx",
    "shl $32, %rcx",
    "mov %rcx, %rdx",
    "mov %r13, %rax",
    "pop %r13",
    "pop %r12",
    "pop %rbx",
    "ret",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_lines_assemble_without_diagnostics() {
        let mut diags = crate::errors::Diagnostics::new();
        let image = crate::assembler::assemble(&runtime_lines(), &mut diags);
        assert!(diags.is_empty(), "{}", diags.render());
        assert!(!image.text.is_empty());
        assert!(image.symbols.iter().any(|s| s.name == "runtime_alloc"));
        assert!(image.symbols.iter().any(|s| s.name == "queue_enqueue"));
    }

    #[test]
    fn every_queue_and_print_symbol_is_defined() {
        let mut diags = crate::errors::Diagnostics::new();
        let image = crate::assembler::assemble(&runtime_lines(), &mut diags);
        let names: Vec<&str> = image.symbols.iter().map(|s| s.name.as_str()).collect();
        for expected in [
            "runtime_alloc",
            "runtime_free",
            "queue_enqueue",
            "queue_dequeue",
            "builtin_print",
            "builtin_println",
            "builtin_print_i64",
            "builtin_string_eq",
            "builtin_string_concat",
            "builtin_format",
            "builtin_format_i64",
            "builtin_vec_new",
            "builtin_vec_push",
            "builtin_vec_pop",
            "builtin_vec_len",
            "builtin_vec_get",
            "builtin_vec_set",
            "builtin_map_new",
            "builtin_map_set",
            "builtin_map_get",
            "builtin_map_len",
            "builtin_map_keys",
            "builtin_map_values",
        ] {
            assert!(names.contains(&expected), "missing symbol {expected}");
        }
    }
}
