use struk_core::{ExpenseRecord, Source};

const EDIT_HELP: &str = "Balas:
Y = simpan
N = batal
edit 5500 / total 5500 = ubah total
merchant <nama> = ubah merchant
kategori <nama> = ubah kategori
metode <nama> = ubah metode bayar
tanggal DD/MM/YYYY = ubah tanggal
jam HH:MM = ubah jam";

/// The pending expense in a fixed field order, followed by the commands
/// the user may reply with.
pub fn render_preview(record: &ExpenseRecord, anomaly: bool) -> String {
    let mut out = String::new();
    out.push_str(match record.source {
        Source::Ocr => "📸 *HASIL STRUK*\n",
        Source::Manual => "📌 *PENGELUARAN*\n",
    });
    out.push_str(&format!("🏪 Merchant: {}\n", record.merchant));
    out.push_str(&format!("📅 Tanggal: {}\n", record.date_label()));
    out.push_str(&format!("⏰ Jam: {}\n", record.time_label()));
    out.push_str(&format!("💰 Total: {}\n", record.total));
    out.push_str(&format!("📂 Kategori: {}\n", record.category));
    out.push_str(&format!("💳 Metode: {}\n", record.payment_method));
    if record.source == Source::Ocr {
        out.push_str(&format!("🎯 Akurasi OCR: {}%\n", record.ocr_confidence));
    }
    if anomaly {
        out.push_str("⚠️ Total ini jauh di atas biasanya untuk merchant ini. Cek lagi ya.\n");
    }
    out.push('\n');
    out.push_str(EDIT_HELP);
    out
}

pub fn armed_prompt() -> String {
    "📷 Siap! Kirim foto struk sekarang.\nAtau ketik manual: manual 25000 Nama Toko".to_string()
}

pub fn armed_hint() -> String {
    "Kirim foto struk, atau ketik: manual <total> <merchant>".to_string()
}

pub fn manual_instructions() -> String {
    "❌ Struk tidak terbaca. Ketik manual dengan format:
total 25000
merchant Nama Toko
kategori Food & Drink
metode Cash
tanggal 01/02/2024
jam 14:30

Hanya total yang wajib. Balas N untuk batal."
        .to_string()
}

pub fn manual_rejected() -> String {
    "❌ Total tidak valid. Contoh: manual 25000 Nama Toko".to_string()
}

pub fn manual_abandoned(arm_command: &str) -> String {
    format!("❌ Total tidak terbaca, input dibatalkan. Ketik {arm_command} untuk mulai lagi.")
}

pub fn saved() -> String {
    "✅ DATA TERSIMPAN".to_string()
}

pub fn cancelled() -> String {
    "❌ DIBATALKAN".to_string()
}

pub fn duplicate() -> String {
    "⚠️ Struk ini sudah pernah dicatat. Kirim foto struk lain.".to_string()
}

pub fn persistence_failed() -> String {
    "⚠️ Gagal menyimpan, data belum hilang. Balas Y untuk coba lagi.".to_string()
}
