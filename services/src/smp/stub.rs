//! Parking stub template
//!
//! The stub is copied to the start of every mailbox and is the `CPU_ON` entry point of
//! its secondary processor. It sets up a stack inside the mailbox, then sleeps in `wfi`
//! until the jump slot holds an address, and calls it as
//! `jump(context, processor_id)`. When the call returns it goes back to sleep.
//!
//! ```text
//! 0x00  ldr  x1, stack_top
//! 0x04  mov  sp, x1
//! 0x08  wfi
//! 0x0c  ldr  x2, jump_slot
//! 0x10  ldr  x3, [x2]
//! 0x14  cbz  x3, 0x08
//! 0x18  ldr  x0, [x2, #8]      // context slot follows the jump slot
//! 0x1c  ldr  x4, id_slot
//! 0x20  ldr  w1, [x4]
//! 0x24  blr  x3
//! 0x28  b    0x08
//! 0x2c  nop
//! 0x30  stack_top   (patched)
//! 0x38  id_slot     (patched)
//! 0x40  jump_slot   (patched)
//! ```

/// Whole mailbox region.
pub const MAILBOX_SIZE: usize = 0x1000;
/// Firmware part of the mailbox, split in halves between code and stack.
pub const MAILBOX_FW_SIZE: usize = 0x800;
pub const CODE_AREA_SIZE: usize = MAILBOX_FW_SIZE / 2;
pub const STACK_TOP_OFFSET: usize = MAILBOX_FW_SIZE;

pub const PROCESSOR_ID_OFFSET: usize = 0x800;
pub const JUMP_ADDRESS_OFFSET: usize = 0x808;
pub const CONTEXT_OFFSET: usize = 0x810;
const DATA_AREA_END: usize = CONTEXT_OFFSET + 8;

/// Mailbox-relative value a patch slot receives, as an absolute address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchField {
    StackTop,
    ProcessorIdSlot,
    JumpAddressSlot,
}

impl PatchField {
    pub const fn mailbox_offset(self) -> usize {
        match self {
            PatchField::StackTop => STACK_TOP_OFFSET,
            PatchField::ProcessorIdSlot => PROCESSOR_ID_OFFSET,
            PatchField::JumpAddressSlot => JUMP_ADDRESS_OFFSET,
        }
    }
}

/// A 64-bit little-endian slot at `offset` in the stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patch {
    pub offset: usize,
    pub field: PatchField,
}

#[derive(Debug)]
pub struct StubTemplate {
    code: &'static [u8],
    patches: &'static [Patch],
}

const STUB_WORDS: [u32; 18] = [
    0x5800_0181, // ldr  x1, stack_top
    0x9100_003F, // mov  sp, x1
    0xD503_207F, // wfi
    0x5800_01A2, // ldr  x2, jump_slot
    0xF940_0043, // ldr  x3, [x2]
    0xB4FF_FFA3, // cbz  x3, wfi
    0xF940_0440, // ldr  x0, [x2, #8]
    0x5800_00E4, // ldr  x4, id_slot
    0xB940_0081, // ldr  w1, [x4]
    0xD63F_0060, // blr  x3
    0x17FF_FFF8, // b    wfi
    0xD503_201F, // nop
    0, 0, // stack_top
    0, 0, // id_slot
    0, 0, // jump_slot
];

const STUB_PATCHES: [Patch; 3] = [
    Patch {
        offset: 0x30,
        field: PatchField::StackTop,
    },
    Patch {
        offset: 0x38,
        field: PatchField::ProcessorIdSlot,
    },
    Patch {
        offset: 0x40,
        field: PatchField::JumpAddressSlot,
    },
];

const STUB_CODE: [u8; STUB_WORDS.len() * 4] = words_to_bytes(&STUB_WORDS);

const fn words_to_bytes<const N: usize>(words: &[u32]) -> [u8; N] {
    let mut bytes = [0u8; N];
    let mut i = 0;
    while i < words.len() {
        let word = words[i].to_le_bytes();
        bytes[i * 4] = word[0];
        bytes[i * 4 + 1] = word[1];
        bytes[i * 4 + 2] = word[2];
        bytes[i * 4 + 3] = word[3];
        i += 1;
    }
    bytes
}

const fn patches_fit(code_len: usize, patches: &[Patch]) -> bool {
    let mut i = 0;
    while i < patches.len() {
        let offset = patches[i].offset;
        if offset % 8 != 0 || offset + 8 > code_len {
            return false;
        }
        i += 1;
    }
    true
}

const _: () = assert!(STUB_CODE.len() < CODE_AREA_SIZE);
const _: () = assert!(patches_fit(STUB_CODE.len(), &STUB_PATCHES));
const _: () = assert!(DATA_AREA_END <= MAILBOX_SIZE);

pub const PARKING_STUB: StubTemplate = StubTemplate {
    code: &STUB_CODE,
    patches: &STUB_PATCHES,
};

impl StubTemplate {
    pub const fn code(&self) -> &'static [u8] {
        self.code
    }

    pub const fn patches(&self) -> &'static [Patch] {
        self.patches
    }

    pub fn patch_offset(&self, field: PatchField) -> Option<usize> {
        self.patches
            .iter()
            .find(|p| p.field == field)
            .map(|p| p.offset)
    }

    /// Writes the patched stub and an empty data area into `region`, the memory that
    /// lives at address `base`.
    pub fn install(&self, base: usize, region: &mut [u8]) {
        assert!(region.len() >= MAILBOX_SIZE, "mailbox region too small");

        region[..self.code.len()].copy_from_slice(self.code);
        for patch in self.patches {
            let value = (base + patch.field.mailbox_offset()) as u64;
            region[patch.offset..patch.offset + 8].copy_from_slice(&value.to_le_bytes());
        }
        region[PROCESSOR_ID_OFFSET..DATA_AREA_END].fill(0);
    }
}
