//! Polar Coding for PDCCH
//!
//! Polar code construction, encoding and successive-cancellation decoding
//! per 3GPP TS 38.212 Section 5.3.1, with the downlink control rate
//! matching of Section 5.4.1. Reliability ordering follows the universal
//! sequence of Table 5.3.1.2-1. DCI uses no triangular channel
//! interleaver (I_BIL = 0), so bit selection maps straight onto the
//! sub-block interleaved code word.

use crate::LayerError;
use common::utils::CRC24C_POLY;
use tracing::trace;

/// Maximum downlink polar code length (log2), N <= 512 for PDCCH
pub const NMAX_LOG_DL: usize = 9;
/// Maximum input length of the K-bit interleaver (K_IL_max)
pub const MAX_INTERLEAVED_BITS: usize = 164;
/// CRC bits appended to the interleaver input
const CRC_LENGTH: usize = 24;
/// LLR magnitude assigned to shortened (known zero) code bits
const SHORTENED_LLR: f32 = 10_000.0;

/// Universal reliability sequence of TS 38.212 Table 5.3.1.2-1, least
/// reliable position first. The sequence is nested: the ordering for any
/// N <= 1024 is the subsequence of entries below N.
#[rustfmt::skip]
const POLAR_SEQUENCE_1024: [u16; 1024] = [
    0, 1, 2, 4, 8, 16, 32, 3, 5, 64, 9, 6, 17, 10, 18, 128,
    12, 33, 65, 20, 256, 34, 24, 36, 7, 129, 66, 512, 11, 40, 68, 130,
    19, 13, 48, 14, 72, 257, 21, 132, 35, 258, 26, 513, 80, 37, 25, 22,
    136, 260, 264, 38, 514, 96, 67, 41, 144, 28, 69, 42, 516, 49, 74, 272,
    160, 520, 288, 528, 192, 544, 70, 44, 131, 81, 50, 73, 15, 320, 133, 52,
    23, 134, 384, 76, 137, 82, 56, 27, 97, 39, 259, 84, 138, 145, 261, 29,
    43, 98, 515, 88, 140, 30, 146, 71, 262, 265, 161, 576, 45, 100, 640, 51,
    148, 46, 75, 266, 273, 517, 104, 162, 53, 193, 152, 77, 164, 768, 268, 274,
    518, 54, 83, 57, 521, 112, 135, 78, 289, 194, 85, 276, 522, 58, 168, 139,
    99, 86, 60, 280, 89, 290, 529, 524, 196, 141, 101, 147, 176, 142, 530, 321,
    31, 200, 90, 545, 292, 322, 532, 263, 149, 102, 105, 304, 296, 163, 92, 47,
    267, 385, 546, 324, 208, 386, 150, 153, 165, 106, 55, 328, 536, 577, 548, 113,
    154, 79, 269, 108, 578, 224, 166, 519, 552, 195, 270, 641, 523, 275, 580, 291,
    59, 169, 560, 114, 277, 156, 87, 197, 116, 170, 61, 531, 525, 642, 281, 278,
    526, 177, 293, 388, 91, 584, 769, 198, 172, 120, 201, 336, 62, 282, 143, 103,
    178, 294, 93, 644, 202, 592, 323, 392, 297, 770, 107, 180, 151, 209, 284, 648,
    94, 204, 298, 400, 608, 352, 325, 533, 155, 210, 305, 547, 300, 109, 184, 534,
    537, 115, 167, 225, 326, 306, 772, 157, 656, 329, 110, 117, 212, 171, 776, 330,
    226, 549, 538, 387, 308, 216, 416, 271, 279, 158, 337, 550, 672, 118, 332, 579,
    540, 389, 173, 121, 553, 199, 784, 179, 228, 338, 312, 704, 390, 174, 554, 581,
    393, 283, 122, 448, 353, 561, 203, 63, 340, 394, 527, 582, 556, 181, 295, 285,
    232, 124, 205, 182, 643, 562, 286, 585, 299, 354, 211, 401, 185, 396, 344, 586,
    645, 593, 535, 240, 206, 95, 327, 564, 800, 402, 356, 307, 301, 417, 213, 568,
    832, 588, 186, 646, 404, 227, 896, 594, 418, 302, 649, 771, 360, 539, 111, 331,
    214, 309, 188, 449, 217, 408, 609, 596, 551, 650, 229, 159, 420, 310, 541, 773,
    610, 657, 333, 119, 600, 339, 218, 368, 652, 230, 391, 313, 450, 542, 334, 233,
    555, 774, 175, 123, 658, 612, 341, 777, 220, 314, 424, 395, 673, 583, 355, 287,
    183, 234, 125, 557, 660, 616, 342, 316, 241, 778, 563, 345, 452, 397, 403, 207,
    674, 558, 785, 432, 357, 187, 236, 664, 624, 587, 780, 705, 126, 242, 565, 398,
    346, 456, 358, 405, 303, 569, 244, 595, 189, 566, 676, 361, 706, 589, 215, 786,
    647, 348, 419, 406, 464, 680, 801, 362, 590, 409, 570, 788, 597, 572, 219, 311,
    708, 598, 601, 651, 421, 792, 802, 611, 602, 410, 231, 688, 653, 248, 369, 190,
    364, 654, 659, 335, 480, 315, 221, 370, 613, 422, 425, 451, 614, 543, 235, 412,
    343, 372, 775, 317, 222, 426, 453, 237, 559, 833, 804, 712, 834, 661, 808, 779,
    617, 604, 433, 720, 816, 836, 347, 897, 243, 662, 454, 318, 675, 618, 898, 781,
    376, 428, 665, 736, 567, 840, 625, 238, 359, 457, 399, 787, 591, 678, 434, 677,
    349, 245, 458, 666, 620, 363, 127, 191, 782, 407, 436, 626, 571, 465, 681, 246,
    707, 350, 599, 668, 790, 460, 249, 682, 573, 411, 803, 789, 709, 365, 440, 628,
    689, 374, 423, 466, 793, 250, 371, 481, 574, 413, 603, 366, 468, 655, 900, 805,
    615, 684, 710, 429, 794, 252, 373, 605, 848, 690, 713, 632, 482, 806, 427, 904,
    414, 223, 663, 692, 835, 619, 472, 455, 796, 809, 714, 721, 837, 716, 864, 810,
    606, 912, 722, 696, 377, 435, 817, 319, 621, 812, 484, 430, 838, 667, 488, 239,
    378, 459, 622, 627, 437, 380, 818, 461, 496, 669, 679, 724, 841, 629, 351, 467,
    438, 737, 251, 462, 442, 441, 469, 247, 683, 842, 738, 899, 670, 783, 849, 820,
    728, 928, 791, 367, 901, 630, 685, 844, 633, 711, 253, 691, 824, 902, 686, 740,
    850, 375, 444, 470, 483, 415, 485, 905, 795, 473, 634, 744, 852, 960, 865, 693,
    797, 906, 715, 807, 474, 636, 694, 254, 717, 575, 913, 798, 811, 379, 697, 431,
    607, 489, 866, 723, 486, 908, 718, 813, 476, 856, 839, 725, 698, 914, 752, 868,
    819, 814, 439, 929, 490, 623, 671, 739, 916, 463, 843, 381, 497, 930, 821, 726,
    961, 872, 492, 631, 729, 700, 443, 741, 845, 920, 382, 822, 851, 730, 498, 880,
    742, 445, 471, 635, 932, 687, 903, 825, 500, 846, 745, 826, 732, 446, 962, 936,
    475, 853, 867, 637, 907, 487, 695, 746, 828, 753, 854, 857, 504, 799, 255, 964,
    909, 719, 477, 915, 638, 748, 944, 869, 491, 699, 754, 858, 478, 968, 383, 910,
    815, 976, 870, 917, 727, 493, 873, 701, 931, 756, 860, 499, 731, 823, 922, 874,
    918, 502, 933, 743, 760, 881, 494, 702, 921, 501, 876, 847, 992, 447, 733, 827,
    934, 882, 937, 963, 747, 505, 855, 924, 734, 829, 965, 938, 884, 506, 749, 945,
    966, 755, 859, 940, 830, 911, 871, 639, 888, 479, 946, 750, 969, 508, 861, 757,
    970, 919, 875, 862, 758, 948, 977, 923, 972, 761, 877, 952, 495, 703, 935, 978,
    883, 762, 503, 925, 878, 735, 993, 885, 939, 994, 980, 926, 764, 941, 967, 886,
    831, 947, 507, 889, 984, 751, 942, 996, 971, 890, 509, 949, 973, 1000, 892, 950,
    863, 759, 1008, 510, 979, 953, 763, 974, 954, 879, 981, 982, 927, 995, 765, 956,
    887, 985, 997, 986, 943, 891, 998, 766, 511, 988, 1001, 951, 1002, 893, 975, 894,
    1009, 955, 1004, 1010, 957, 983, 958, 987, 1012, 999, 1016, 767, 989, 1003, 990, 1005,
    959, 1011, 1013, 895, 1006, 1014, 1017, 1018, 991, 1020, 1007, 1015, 1019, 1021, 1022, 1023,
];

/// Sub-block permutation of TS 38.212 Section 5.4.1.1
const SUBBLOCK_PERMUTATION: [usize; 32] = [
    0, 1, 2, 4, 3, 5, 6, 7, 8, 16, 9, 17, 10, 18, 11, 19,
    12, 20, 13, 21, 14, 22, 15, 23, 24, 25, 26, 28, 27, 29, 30, 31,
];

/// One polar code instance for a (K, E) pair
pub struct PolarCode {
    /// Code length N
    n: usize,
    /// Information bits K, payload plus CRC
    k: usize,
    /// Rate-matched length E
    e: usize,
    /// log2(N)
    n_log: usize,
    /// Bit allocation, true marks an information position
    info_bits: Vec<bool>,
    /// Sub-block interleaver pattern applied before bit selection
    block_interleaver: Vec<usize>,
}

impl PolarCode {
    pub fn new(k: usize, e: usize) -> Result<Self, LayerError> {
        if k == 0 || e == 0 {
            return Err(LayerError::InvalidConfiguration(format!(
                "polar code needs K and E nonzero, got K={} E={}",
                k, e
            )));
        }

        let n_log = Self::calculate_n_log(k, e, NMAX_LOG_DL);
        let n = 1 << n_log;
        if k > n {
            return Err(LayerError::InvalidConfiguration(format!(
                "K={} does not fit code length N={}",
                k, n
            )));
        }

        let reliability_sequence = Self::reliability_sequence(n);
        let block_interleaver = Self::generate_block_interleaver(n);
        let info_bits = Self::allocate_bits(n, k, e, &reliability_sequence, &block_interleaver)?;

        trace!("Polar code K={} E={} N={}", k, e, n);

        Ok(Self {
            n,
            k,
            e,
            n_log,
            info_bits,
            block_interleaver,
        })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn e(&self) -> usize {
        self.e
    }

    fn ceil_log2(value: usize) -> usize {
        if value <= 1 {
            0
        } else {
            usize::BITS as usize - (value - 1).leading_zeros() as usize
        }
    }

    /// Code length selection of TS 38.212 Section 5.3.1: one size below
    /// ceil(log2 E) when the repetition overhead stays under 1/8 and the
    /// rate is below 9/16, capped to [5, n_max_log]
    fn calculate_n_log(k: usize, e: usize, n_max_log: usize) -> usize {
        let e_log = Self::ceil_log2(e);
        let n1 = if e_log > 0 && 8 * e <= 9 * (1 << (e_log - 1)) && 16 * k < 9 * e {
            e_log - 1
        } else {
            e_log
        };
        let n2 = Self::ceil_log2(8 * k);
        n1.min(n2).min(n_max_log).max(5)
    }

    /// Reliability ordering for code length N, least reliable first
    fn reliability_sequence(n: usize) -> Vec<usize> {
        POLAR_SEQUENCE_1024
            .iter()
            .map(|&q| q as usize)
            .filter(|&q| q < n)
            .collect()
    }

    /// Freeze the positions the rate matcher makes undecodable, then the
    /// least reliable of the rest, leaving K information positions
    fn allocate_bits(
        n: usize,
        k: usize,
        e: usize,
        reliability_sequence: &[usize],
        block_interleaver: &[usize],
    ) -> Result<Vec<bool>, LayerError> {
        let mut frozen = vec![false; n];

        if e < n {
            if 16 * k <= 7 * e {
                // Puncturing drops the head of the interleaved code word;
                // the matching u-domain positions plus a leading block
                // carry no information
                for &position in &block_interleaver[..n - e] {
                    frozen[position] = true;
                }
                let incapable = if 4 * e >= 3 * n {
                    (3 * n - 2 * e).div_ceil(4)
                } else {
                    (9 * n - 4 * e).div_ceil(16)
                };
                for flag in frozen.iter_mut().take(incapable) {
                    *flag = true;
                }
            } else {
                // Shortening drops the tail, which encodes to known zeros
                // once these positions are frozen
                for &position in &block_interleaver[e..] {
                    frozen[position] = true;
                }
            }
        }

        let needed = n - k;
        let mut count = frozen.iter().filter(|&&f| f).count();
        if count > needed {
            return Err(LayerError::InvalidConfiguration(format!(
                "K={} does not fit the rate-matched code (E={}, N={})",
                k, e, n
            )));
        }
        for &position in reliability_sequence {
            if count == needed {
                break;
            }
            if !frozen[position] {
                frozen[position] = true;
                count += 1;
            }
        }

        Ok(frozen.iter().map(|&f| !f).collect())
    }

    /// Sub-block interleaver pattern: output i takes code bit pattern[i].
    /// N is always a multiple of 32 here (n_log >= 5).
    fn generate_block_interleaver(n: usize) -> Vec<usize> {
        let block = n / 32;
        (0..n)
            .map(|j| SUBBLOCK_PERMUTATION[j / block] * block + j % block)
            .collect()
    }
}

/// Pattern of the K-bit interleaver of TS 38.212 Section 5.3.1.1 for the
/// maximum input length: each CRC bit lands directly after the last
/// payload bit contributing to it, with payload coverage derived from the
/// CRC24C parity equations (column i holds x^(163-i) mod g).
fn distributed_crc_pattern() -> Vec<usize> {
    const PAYLOAD_BITS: usize = MAX_INTERLEAVED_BITS - CRC_LENGTH;

    let mut columns = [0u32; PAYLOAD_BITS];
    let mut remainder = CRC24C_POLY;
    columns[PAYLOAD_BITS - 1] = remainder;
    for i in (0..PAYLOAD_BITS - 1).rev() {
        remainder <<= 1;
        if remainder & (1 << CRC_LENGTH) != 0 {
            remainder ^= (1 << CRC_LENGTH) | CRC24C_POLY;
        }
        columns[i] = remainder;
    }

    let mut pattern = Vec::with_capacity(MAX_INTERLEAVED_BITS);
    let mut taken = [false; PAYLOAD_BITS];
    for j in 0..CRC_LENGTH {
        let mask = 1u32 << (CRC_LENGTH - 1 - j);
        for (i, column) in columns.iter().enumerate() {
            if !taken[i] && column & mask != 0 {
                taken[i] = true;
                pattern.push(i);
            }
        }
        pattern.push(PAYLOAD_BITS + j);
    }
    pattern
}

/// Pattern for K input bits: keep the maximum-length entries addressing
/// the last K positions, shifted down. Identity above the interleaver
/// limit.
fn k_interleaver_pattern(k: usize) -> Vec<usize> {
    if k > MAX_INTERLEAVED_BITS {
        return (0..k).collect();
    }
    let offset = MAX_INTERLEAVED_BITS - k;
    distributed_crc_pattern()
        .into_iter()
        .filter(|&p| p >= offset)
        .map(|p| p - offset)
        .collect()
}

/// Interleave the K payload-plus-CRC bits before bit allocation
pub fn k_bit_interleave(input: &[u8]) -> Vec<u8> {
    k_interleaver_pattern(input.len())
        .into_iter()
        .map(|source| input[source])
        .collect()
}

/// Invert the K-bit interleaver after decoding
pub fn k_bit_deinterleave(input: &[u8]) -> Vec<u8> {
    let mut output = vec![0u8; input.len()];
    for (i, source) in k_interleaver_pattern(input.len()).into_iter().enumerate() {
        output[source] = input[i];
    }
    output
}

/// Polar encoder for the transmit direction, used by the decoder tests and
/// reference-signal synthesis
pub struct PolarEncoder;

impl PolarEncoder {
    /// Encode K interleaved bits into E rate-matched bits
    pub fn encode(code: &PolarCode, info: &[u8]) -> Result<Vec<u8>, LayerError> {
        if info.len() != code.k {
            return Err(LayerError::ProcessingError(format!(
                "expected {} information bits, got {}",
                code.k,
                info.len()
            )));
        }

        // Bit allocation onto the information positions
        let mut bits = vec![0u8; code.n];
        let mut info_index = 0;
        for (i, &is_info) in code.info_bits.iter().enumerate() {
            if is_info {
                bits[i] = info[info_index];
                info_index += 1;
            }
        }

        Self::polar_transform(&mut bits, code.n_log);

        // Sub-block interleaving then bit selection
        let interleaved: Vec<u8> = code
            .block_interleaver
            .iter()
            .map(|&source| bits[source])
            .collect();

        let selected = if code.e >= code.n {
            (0..code.e).map(|i| interleaved[i % code.n]).collect()
        } else if 16 * code.k <= 7 * code.e {
            interleaved[code.n - code.e..].to_vec()
        } else {
            interleaved[..code.e].to_vec()
        };

        Ok(selected)
    }

    /// In-place Arikan transform, its own inverse
    fn polar_transform(bits: &mut [u8], n_log: usize) {
        for s in 1..=n_log {
            let half_stage = 1 << (s - 1);
            let full_stage = 1 << s;
            for j in (0..bits.len()).step_by(full_stage) {
                for i in 0..half_stage {
                    bits[j + i] ^= bits[j + i + half_stage];
                }
            }
        }
    }
}

/// Successive-cancellation polar decoder. LLR convention: positive means
/// bit zero.
pub struct PolarDecoder;

impl PolarDecoder {
    /// Decode E soft bits back to the K interleaved information bits
    pub fn decode(code: &PolarCode, llrs: &[f32]) -> Result<Vec<u8>, LayerError> {
        if llrs.len() != code.e {
            return Err(LayerError::ProcessingError(format!(
                "expected {} soft bits, got {}",
                code.e,
                llrs.len()
            )));
        }

        let llr_n = Self::rate_recover(code, llrs);
        let decoded = Self::sc_decode(&llr_n, &code.info_bits);

        let mut info = Vec::with_capacity(code.k);
        for (i, &is_info) in code.info_bits.iter().enumerate() {
            if is_info {
                info.push(decoded[i]);
            }
        }
        Ok(info)
    }

    /// Invert bit selection and sub-block interleaving. Repeated positions
    /// accumulate, punctured positions decode as erasures, shortened
    /// positions as known zeros.
    fn rate_recover(code: &PolarCode, llrs: &[f32]) -> Vec<f32> {
        let mut interleaved = vec![0.0f32; code.n];

        if code.e >= code.n {
            for (i, &llr) in llrs.iter().enumerate() {
                interleaved[i % code.n] += llr;
            }
        } else if 16 * code.k <= 7 * code.e {
            interleaved[code.n - code.e..].copy_from_slice(llrs);
        } else {
            interleaved[..code.e].copy_from_slice(llrs);
            for value in interleaved[code.e..].iter_mut() {
                *value = SHORTENED_LLR;
            }
        }

        let mut llr_n = vec![0.0f32; code.n];
        for (i, &source) in code.block_interleaver.iter().enumerate() {
            llr_n[source] = interleaved[i];
        }
        llr_n
    }

    /// Recursive SC decode returning the decoded u-domain bits
    fn sc_decode(llrs: &[f32], info_bits: &[bool]) -> Vec<u8> {
        let (u, _) = Self::decode_node(llrs, info_bits);
        u
    }

    fn decode_node(llrs: &[f32], info_bits: &[bool]) -> (Vec<u8>, Vec<u8>) {
        let n = llrs.len();
        if n == 1 {
            let bit = if info_bits[0] && llrs[0] < 0.0 { 1 } else { 0 };
            return (vec![bit], vec![bit]);
        }
        let half = n / 2;

        // Min-sum f function for the upper branch
        let f_llrs: Vec<f32> = (0..half)
            .map(|i| {
                let (a, b) = (llrs[i], llrs[i + half]);
                a.signum() * b.signum() * a.abs().min(b.abs())
            })
            .collect();
        let (u_upper, x_upper) = Self::decode_node(&f_llrs, &info_bits[..half]);

        // g function conditioned on the upper partial sums
        let g_llrs: Vec<f32> = (0..half)
            .map(|i| {
                if x_upper[i] == 1 {
                    llrs[i + half] - llrs[i]
                } else {
                    llrs[i + half] + llrs[i]
                }
            })
            .collect();
        let (u_lower, x_lower) = Self::decode_node(&g_llrs, &info_bits[half..]);

        let mut u = u_upper;
        u.extend_from_slice(&u_lower);
        let mut x: Vec<u8> = (0..half).map(|i| x_upper[i] ^ x_lower[i]).collect();
        x.extend_from_slice(&x_lower);
        (u, x)
    }
}
